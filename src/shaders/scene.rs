//! WGSL for programs that draw scene geometry or read the G-buffer

macro_rules! scene_params {
    () => {
        r#"
struct SceneParams {
    model: mat4x4<f32>,
    normal_matrix: mat4x4<f32>,
    view: mat4x4<f32>,
    projection: mat4x4<f32>,
    light_space: mat4x4<f32>,
    camera_position: vec3<f32>,
    light_intensity: f32,
    light_position: vec3<f32>,
    cutoff: f32,
    light_direction: vec3<f32>,
    far_plane: f32,
    light_color: vec3<f32>,
    shadow_bias: f32,
    attenuation: vec3<f32>,
    shadows_enabled: i32,
    ambient_color: vec3<f32>,
    specular: f32,
    albedo: vec4<f32>,
    color: vec4<f32>,
    has_diffuse_map: i32,
    reflectivity: f32,
    has_skybox: i32,
    has_light: i32,
    ssao_enabled: i32,
}

@group(0) @binding(0) var<uniform> params: SceneParams;
"#
    };
}

macro_rules! mesh_vertex {
    () => {
        r#"
struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
    @location(3) tangent: vec4<f32>,
}

struct VertexOutput {
    @builtin(position) clip: vec4<f32>,
    @location(0) world_position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
}

@vertex
fn vs_main(in: VertexInput) -> VertexOutput {
    let world = params.model * vec4<f32>(in.position, 1.0);
    var out: VertexOutput;
    out.clip = params.projection * params.view * world;
    out.world_position = world.xyz;
    out.normal = normalize((params.normal_matrix * vec4<f32>(in.normal, 0.0)).xyz);
    out.uv = in.uv;
    return out;
}
"#
    };
}

macro_rules! fullscreen_vertex {
    () => {
        r#"
struct VertexOutput {
    @builtin(position) clip: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_main(@builtin(vertex_index) vertex_index: u32) -> VertexOutput {
    let x = f32((vertex_index << 1u) & 2u);
    let y = f32(vertex_index & 2u);
    var out: VertexOutput;
    out.clip = vec4<f32>(x * 2.0 - 1.0, y * 2.0 - 1.0, 0.0, 1.0);
    out.uv = vec2<f32>(x, 1.0 - y);
    return out;
}
"#
    };
}

macro_rules! gbuffer_inputs {
    () => {
        r#"
@group(1) @binding(0) var g_position: texture_2d<f32>;
@group(1) @binding(1) var g_position_sampler: sampler;
@group(1) @binding(2) var g_normal: texture_2d<f32>;
@group(1) @binding(3) var g_normal_sampler: sampler;
@group(1) @binding(4) var g_albedo: texture_2d<f32>;
@group(1) @binding(5) var g_albedo_sampler: sampler;

fn load_texel(t: texture_2d<f32>, pixel: vec2<i32>) -> vec4<f32> {
    let size = vec2<i32>(textureDimensions(t));
    return textureLoad(t, clamp(pixel, vec2<i32>(0), size - vec2<i32>(1)), 0);
}
"#
    };
}

macro_rules! diffuse_map {
    () => {
        r#"
@group(1) @binding(12) var diffuse_map: texture_2d<f32>;
@group(1) @binding(13) var diffuse_sampler: sampler;

fn material_albedo(uv: vec2<f32>) -> vec4<f32> {
    if params.has_diffuse_map != 0 {
        return params.albedo * textureSampleLevel(diffuse_map, diffuse_sampler, uv, 0.0);
    }
    return params.albedo;
}
"#
    };
}

macro_rules! lighting {
    () => {
        r#"
@group(1) @binding(8) var shadow_map: texture_depth_2d;
@group(1) @binding(9) var shadow_map_sampler: sampler;
@group(1) @binding(10) var shadow_cube: texture_depth_cube;
@group(1) @binding(11) var shadow_cube_sampler: sampler;

const SHININESS: f32 = 32.0;
const LIGHT_DIRECTIONAL: i32 = 0;
const LIGHT_POINT: i32 = 1;
const LIGHT_SPOT: i32 = 2;

fn safe_normalize(v: vec3<f32>) -> vec3<f32> {
    let len = length(v);
    if len > 0.0 {
        return v / len;
    }
    return vec3<f32>(0.0);
}

fn blinn_phong(n: vec3<f32>, l: vec3<f32>, v: vec3<f32>, albedo: vec3<f32>, specular: f32, radiance: vec3<f32>) -> vec3<f32> {
    let diffuse = max(dot(n, l), 0.0);
    if diffuse <= 0.0 {
        return vec3<f32>(0.0);
    }
    let h = safe_normalize(l + v);
    let highlight = pow(max(dot(n, h), 0.0), SHININESS) * specular;
    return (albedo * diffuse + vec3<f32>(highlight)) * radiance;
}

fn attenuate(dist: f32) -> f32 {
    let k = params.attenuation;
    let denom = k.x + k.y * dist + k.z * dist * dist;
    if denom > 0.0 {
        return 1.0 / denom;
    }
    return 1.0;
}

fn spot_factor(to_fragment: vec3<f32>) -> f32 {
    let theta = dot(safe_normalize(to_fragment), safe_normalize(params.light_direction));
    if theta <= params.cutoff {
        return 0.0;
    }
    return 1.0 - (1.0 - theta) / max(1.0 - params.cutoff, 1e-4);
}

fn shadow_2d(world: vec3<f32>) -> f32 {
    let clip = params.light_space * vec4<f32>(world, 1.0);
    if clip.w <= 0.0 {
        return 0.0;
    }
    let ndc = clip.xyz / clip.w;
    let uv = vec2<f32>(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5);
    if uv.x < 0.0 || uv.x > 1.0 || uv.y < 0.0 || uv.y > 1.0 || ndc.z > 1.0 {
        return 0.0;
    }
    let closest = textureSampleLevel(shadow_map, shadow_map_sampler, uv, 0);
    return select(0.0, 1.0, ndc.z - params.shadow_bias > closest);
}

fn shadow_omni(world: vec3<f32>) -> f32 {
    let to_fragment = world - params.light_position;
    let current = length(to_fragment) / max(params.far_plane, 1e-4);
    let closest = textureSampleLevel(shadow_cube, shadow_cube_sampler, to_fragment, 0);
    return select(0.0, 1.0, current - params.shadow_bias > closest);
}

fn shade_light(kind: i32, position: vec3<f32>, normal: vec3<f32>, albedo: vec3<f32>, specular: f32) -> vec3<f32> {
    let radiance = params.light_color * params.light_intensity;
    let view_dir = safe_normalize(params.camera_position - position);
    let shadows = params.shadows_enabled != 0;

    if kind == LIGHT_DIRECTIONAL {
        let l = -safe_normalize(params.light_direction);
        var shadow = 0.0;
        if shadows {
            shadow = shadow_2d(position);
        }
        return blinn_phong(normal, l, view_dir, albedo, specular, radiance) * (1.0 - shadow);
    }

    let to_light = params.light_position - position;
    let dist = length(to_light);
    let l = to_light / max(dist, 1e-6);
    var factor = attenuate(dist);
    var shadow = 0.0;
    if kind == LIGHT_SPOT {
        factor = factor * spot_factor(-to_light);
        if shadows {
            shadow = shadow_2d(position);
        }
    } else if shadows {
        shadow = shadow_omni(position);
    }
    return blinn_phong(normal, l, view_dir, albedo, specular, radiance) * factor * (1.0 - shadow);
}
"#
    };
}

macro_rules! deferred_light {
    ($kind:literal) => {
        concat!(
            "const LIGHT_KIND: i32 = ",
            $kind,
            ";\n",
            r#"
@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let pixel = vec2<i32>(floor(in.clip.xy));
    let position = load_texel(g_position, pixel);
    if position.w == 0.0 {
        return vec4<f32>(0.0);
    }
    let normal = safe_normalize(load_texel(g_normal, pixel).xyz);
    let albedo_spec = load_texel(g_albedo, pixel);
    let color = shade_light(LIGHT_KIND, position.xyz, normal, albedo_spec.xyz, albedo_spec.w);
    return vec4<f32>(color, 1.0);
}
"#
        )
    };
}

macro_rules! forward_light {
    ($kind:literal) => {
        concat!(
            "const LIGHT_KIND: i32 = ",
            $kind,
            ";\n",
            r#"
@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let albedo = material_albedo(in.uv);
    let color = shade_light(LIGHT_KIND, in.world_position, safe_normalize(in.normal), albedo.xyz, params.specular);
    return vec4<f32>(color, 1.0);
}
"#
        )
    };
}

pub const GBUFFER: &str = concat!(
    scene_params!(),
    mesh_vertex!(),
    diffuse_map!(),
    r#"
struct GBufferOutput {
    @location(0) position: vec4<f32>,
    @location(1) normal: vec4<f32>,
    @location(2) albedo: vec4<f32>,
}

@fragment
fn fs_main(in: VertexOutput) -> GBufferOutput {
    let albedo = material_albedo(in.uv);
    var out: GBufferOutput;
    out.position = vec4<f32>(in.world_position, 1.0);
    out.normal = vec4<f32>(normalize(in.normal), 0.0);
    out.albedo = vec4<f32>(albedo.xyz, params.specular);
    return out;
}
"#
);

pub const SHADOW_DEPTH: &str = concat!(
    scene_params!(),
    r#"
@vertex
fn vs_main(@location(0) position: vec3<f32>) -> @builtin(position) vec4<f32> {
    return params.light_space * params.model * vec4<f32>(position, 1.0);
}

@fragment
fn fs_main() {
}
"#
);

pub const SHADOW_CUBE: &str = concat!(
    scene_params!(),
    r#"
struct VertexOutput {
    @builtin(position) clip: vec4<f32>,
    @location(0) world_position: vec3<f32>,
}

@vertex
fn vs_main(@location(0) position: vec3<f32>) -> VertexOutput {
    let world = params.model * vec4<f32>(position, 1.0);
    var out: VertexOutput;
    out.clip = params.light_space * world;
    out.world_position = world.xyz;
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> @builtin(frag_depth) f32 {
    let dist = length(in.world_position - params.light_position);
    return clamp(dist / max(params.far_plane, 1e-4), 0.0, 1.0);
}
"#
);

pub const STENCIL_PASS: &str = concat!(
    scene_params!(),
    mesh_vertex!(),
    r#"
@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    return vec4<f32>(0.0);
}
"#
);

pub const DEBUG_VOLUME: &str = concat!(
    scene_params!(),
    mesh_vertex!(),
    r#"
@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    return params.color;
}
"#
);

pub const DEFERRED_AMBIENT: &str = concat!(
    scene_params!(),
    fullscreen_vertex!(),
    gbuffer_inputs!(),
    r#"
@group(1) @binding(6) var occlusion: texture_2d<f32>;
@group(1) @binding(7) var occlusion_sampler: sampler;

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let pixel = vec2<i32>(floor(in.clip.xy));
    if load_texel(g_position, pixel).w == 0.0 {
        return vec4<f32>(0.0);
    }
    let albedo = load_texel(g_albedo, pixel).xyz;
    var ao = 1.0;
    if params.ssao_enabled != 0 {
        ao = load_texel(occlusion, pixel).x;
    }
    return vec4<f32>(params.ambient_color * albedo * ao, 1.0);
}
"#
);

pub const DEFERRED_DIRECTIONAL: &str = concat!(
    scene_params!(),
    fullscreen_vertex!(),
    gbuffer_inputs!(),
    lighting!(),
    deferred_light!("0")
);

pub const DEFERRED_POINT: &str = concat!(
    scene_params!(),
    mesh_vertex!(),
    gbuffer_inputs!(),
    lighting!(),
    deferred_light!("1")
);

pub const DEFERRED_SPOT: &str = concat!(
    scene_params!(),
    mesh_vertex!(),
    gbuffer_inputs!(),
    lighting!(),
    deferred_light!("2")
);

pub const FORWARD_AMBIENT: &str = concat!(
    scene_params!(),
    mesh_vertex!(),
    diffuse_map!(),
    r#"
@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let albedo = material_albedo(in.uv);
    return vec4<f32>(params.ambient_color * albedo.xyz, 1.0);
}
"#
);

pub const FORWARD_DIRECTIONAL: &str = concat!(
    scene_params!(),
    mesh_vertex!(),
    diffuse_map!(),
    lighting!(),
    forward_light!("0")
);

pub const FORWARD_POINT: &str = concat!(
    scene_params!(),
    mesh_vertex!(),
    diffuse_map!(),
    lighting!(),
    forward_light!("1")
);

pub const FORWARD_SPOT: &str = concat!(
    scene_params!(),
    mesh_vertex!(),
    diffuse_map!(),
    lighting!(),
    forward_light!("2")
);

pub const TRANSPARENT: &str = concat!(
    scene_params!(),
    mesh_vertex!(),
    diffuse_map!(),
    lighting!(),
    r#"
@fragment
fn fs_main(in: VertexOutput, @builtin(front_facing) front_facing: bool) -> @location(0) vec4<f32> {
    let albedo = material_albedo(in.uv);
    var normal = safe_normalize(in.normal);
    if !front_facing {
        normal = -normal;
    }
    var color = params.ambient_color * albedo.xyz;
    if params.has_light != 0 {
        color = color + shade_light(LIGHT_DIRECTIONAL, in.world_position, normal, albedo.xyz, params.specular);
    }
    return vec4<f32>(color, albedo.w);
}
"#
);

pub const SKYBOX: &str = concat!(
    scene_params!(),
    r#"
@group(1) @binding(14) var environment: texture_cube<f32>;
@group(1) @binding(15) var environment_sampler: sampler;

struct VertexOutput {
    @builtin(position) clip: vec4<f32>,
    @location(0) direction: vec3<f32>,
}

@vertex
fn vs_main(@location(0) position: vec3<f32>) -> VertexOutput {
    let v = params.view;
    let rotation = mat4x4<f32>(
        vec4<f32>(v[0].xyz, 0.0),
        vec4<f32>(v[1].xyz, 0.0),
        vec4<f32>(v[2].xyz, 0.0),
        vec4<f32>(0.0, 0.0, 0.0, 1.0),
    );
    let clip = params.projection * rotation * vec4<f32>(position, 1.0);
    var out: VertexOutput;
    out.clip = vec4<f32>(clip.xy, clip.w, clip.w);
    out.direction = position;
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let color = textureSampleLevel(environment, environment_sampler, in.direction, 0.0);
    return vec4<f32>(color.xyz, 1.0);
}
"#
);

pub const ENVIRONMENT_MAP: &str = concat!(
    scene_params!(),
    mesh_vertex!(),
    diffuse_map!(),
    lighting!(),
    r#"
@group(1) @binding(14) var environment: texture_cube<f32>;
@group(1) @binding(15) var environment_sampler: sampler;

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let albedo = material_albedo(in.uv).xyz;
    let normal = safe_normalize(in.normal);
    let incident = safe_normalize(in.world_position - params.camera_position);
    let reflected = reflect(incident, normal);

    var environment_color = params.ambient_color;
    if params.has_skybox != 0 {
        environment_color = textureSampleLevel(environment, environment_sampler, reflected, 0.0).xyz;
    }
    var lit = params.ambient_color * albedo;
    if params.has_light != 0 {
        lit = lit + shade_light(LIGHT_DIRECTIONAL, in.world_position, normal, albedo, params.specular);
    }
    return vec4<f32>(mix(lit, environment_color, params.reflectivity), 1.0);
}
"#
);
