//! WGSL for full-screen programs

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

macro_rules! post_params {
    () => {
        r#"
struct PostParams {
    texel_size: vec2<f32>,
    threshold: f32,
    exposure: f32,
    gamma: f32,
    tonemap_operator: i32,
    bloom_enabled: i32,
    bloom_strength: f32,
    fxaa_enabled: i32,
    channel: i32,
    subroutine: i32,
}

@group(0) @binding(0) var<uniform> params: PostParams;
@group(1) @binding(0) var source: texture_2d<f32>;
@group(1) @binding(1) var source_sampler: sampler;

const LUMA: vec3<f32> = vec3<f32>(0.2126, 0.7152, 0.0722);

fn sample_source(uv: vec2<f32>) -> vec4<f32> {
    return textureSampleLevel(source, source_sampler, uv, 0.0);
}
"#
    };
}

pub const SSAO: &str = concat!(
    fullscreen_vertex!(),
    r#"
struct SsaoParams {
    view: mat4x4<f32>,
    projection: mat4x4<f32>,
    samples: array<vec4<f32>, 64>,
    noise_scale: vec2<f32>,
    kernel_size: i32,
    radius: f32,
    bias: f32,
    power: f32,
}

@group(0) @binding(0) var<uniform> params: SsaoParams;
@group(1) @binding(0) var g_position: texture_2d<f32>;
@group(1) @binding(1) var g_position_sampler: sampler;
@group(1) @binding(2) var g_normal: texture_2d<f32>;
@group(1) @binding(3) var g_normal_sampler: sampler;
@group(1) @binding(4) var noise: texture_2d<f32>;
@group(1) @binding(5) var noise_sampler: sampler;

fn load_texel(t: texture_2d<f32>, pixel: vec2<i32>) -> vec4<f32> {
    let size = vec2<i32>(textureDimensions(t));
    return textureLoad(t, clamp(pixel, vec2<i32>(0), size - vec2<i32>(1)), 0);
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let pixel = vec2<i32>(floor(in.clip.xy));
    let position = load_texel(g_position, pixel);
    if position.w == 0.0 {
        return vec4<f32>(1.0);
    }
    let frag = (params.view * vec4<f32>(position.xyz, 1.0)).xyz;
    let normal = normalize((params.view * vec4<f32>(load_texel(g_normal, pixel).xyz, 0.0)).xyz);

    let size = vec2<f32>(textureDimensions(g_position));
    let screen_uv = in.clip.xy / size;
    let random = textureSampleLevel(noise, noise_sampler, screen_uv * params.noise_scale, 0.0).xyz;
    let tangent = normalize(random - normal * dot(random, normal));
    let bitangent = cross(normal, tangent);
    let tbn = mat3x3<f32>(tangent, bitangent, normal);

    let kernel_size = min(params.kernel_size, 64);
    if kernel_size <= 0 {
        return vec4<f32>(1.0);
    }
    var occlusion = 0.0;
    for (var i = 0; i < kernel_size; i = i + 1) {
        let sample_pos = frag + tbn * params.samples[i].xyz * params.radius;
        let offset = params.projection * vec4<f32>(sample_pos, 1.0);
        if offset.w <= 0.0 {
            continue;
        }
        let ndc = offset.xy / offset.w;
        let uv = vec2<f32>(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5);
        let occluder = load_texel(g_position, vec2<i32>(floor(uv * size)));
        if occluder.w == 0.0 {
            continue;
        }
        let sample_depth = (params.view * vec4<f32>(occluder.xyz, 1.0)).z;
        let range = smoothstep(0.0, 1.0, params.radius / max(abs(frag.z - sample_depth), 1e-4));
        if sample_depth >= sample_pos.z + params.bias {
            occlusion = occlusion + range;
        }
    }
    let ao = pow(max(1.0 - occlusion / f32(kernel_size), 0.0), params.power);
    return vec4<f32>(ao, ao, ao, 1.0);
}
"#
);

pub const SSAO_BLUR: &str = concat!(
    fullscreen_vertex!(),
    post_params!(),
    r#"
@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let pixel = vec2<i32>(floor(in.clip.xy));
    let size = vec2<i32>(textureDimensions(source));
    var sum = 0.0;
    for (var y = -2; y < 2; y = y + 1) {
        for (var x = -2; x < 2; x = x + 1) {
            let p = clamp(pixel + vec2<i32>(x, y), vec2<i32>(0), size - vec2<i32>(1));
            sum = sum + textureLoad(source, p, 0).x;
        }
    }
    let ao = sum / 16.0;
    return vec4<f32>(ao, ao, ao, 1.0);
}
"#
);

pub const POSTPROCESS: &str = concat!(
    fullscreen_vertex!(),
    post_params!(),
    r#"
const EXTRACT_BRIGHTNESS: i32 = 0;
const BLUR_GAUSSIAN_HORIZONTAL: i32 = 1;
const BLUR_GAUSSIAN_VERTICAL: i32 = 2;

const GAUSSIAN_WEIGHTS: array<f32, 5> = array<f32, 5>(0.227027, 0.1945946, 0.1216216, 0.054054, 0.016216);

fn blur(uv: vec2<f32>, axis: vec2<f32>) -> vec4<f32> {
    let texel_step = params.texel_size * axis;
    var weights = GAUSSIAN_WEIGHTS;
    var color = sample_source(uv).xyz * weights[0];
    for (var i = 1; i < 5; i = i + 1) {
        let offset = texel_step * f32(i);
        color = color + sample_source(uv + offset).xyz * weights[i];
        color = color + sample_source(uv - offset).xyz * weights[i];
    }
    return vec4<f32>(color, 1.0);
}

fn extract_brightness(uv: vec2<f32>) -> vec4<f32> {
    let color = sample_source(uv).xyz;
    if dot(color, LUMA) > params.threshold {
        return vec4<f32>(color, 1.0);
    }
    return vec4<f32>(0.0, 0.0, 0.0, 1.0);
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    if params.subroutine == BLUR_GAUSSIAN_HORIZONTAL {
        return blur(in.uv, vec2<f32>(1.0, 0.0));
    }
    if params.subroutine == BLUR_GAUSSIAN_VERTICAL {
        return blur(in.uv, vec2<f32>(0.0, 1.0));
    }
    return extract_brightness(in.uv);
}
"#
);

pub const TONEMAP: &str = concat!(
    fullscreen_vertex!(),
    post_params!(),
    r#"
@group(1) @binding(2) var bloom: texture_2d<f32>;
@group(1) @binding(3) var bloom_sampler: sampler;

fn aces(x: vec3<f32>) -> vec3<f32> {
    let a = 2.51;
    let b = 0.03;
    let c = 2.43;
    let d = 0.59;
    let e = 0.14;
    return clamp((x * (a * x + b)) / (x * (c * x + d) + e), vec3<f32>(0.0), vec3<f32>(1.0));
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    var hdr = sample_source(in.uv).xyz;
    if params.bloom_enabled != 0 {
        hdr = hdr + textureSampleLevel(bloom, bloom_sampler, in.uv, 0.0).xyz * params.bloom_strength;
    }
    let x = max(hdr * params.exposure, vec3<f32>(0.0));
    var mapped: vec3<f32>;
    switch params.tonemap_operator {
        case 0: { mapped = x / (x + vec3<f32>(1.0)); }
        case 1: { mapped = aces(x); }
        default: { mapped = clamp(x, vec3<f32>(0.0), vec3<f32>(1.0)); }
    }
    let corrected = pow(mapped, vec3<f32>(1.0 / max(params.gamma, 1e-4)));
    return vec4<f32>(corrected, dot(corrected, LUMA));
}
"#
);

pub const FXAA: &str = concat!(
    fullscreen_vertex!(),
    post_params!(),
    r#"
const FXAA_REDUCE_MIN: f32 = 1.0 / 128.0;
const FXAA_REDUCE_MUL: f32 = 1.0 / 8.0;
const FXAA_SPAN_MAX: f32 = 8.0;

fn luma_at(uv: vec2<f32>, offset: vec2<f32>) -> f32 {
    return dot(sample_source(uv + offset * params.texel_size).xyz, LUMA);
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let uv = in.uv;
    let center = sample_source(uv).xyz;
    if params.fxaa_enabled == 0 {
        return vec4<f32>(center, 1.0);
    }
    let luma_nw = luma_at(uv, vec2<f32>(-1.0, -1.0));
    let luma_ne = luma_at(uv, vec2<f32>(1.0, -1.0));
    let luma_sw = luma_at(uv, vec2<f32>(-1.0, 1.0));
    let luma_se = luma_at(uv, vec2<f32>(1.0, 1.0));
    let luma_m = dot(center, LUMA);
    let luma_min = min(luma_m, min(min(luma_nw, luma_ne), min(luma_sw, luma_se)));
    let luma_max = max(luma_m, max(max(luma_nw, luma_ne), max(luma_sw, luma_se)));

    var dir = vec2<f32>(
        -((luma_nw + luma_ne) - (luma_sw + luma_se)),
        (luma_nw + luma_sw) - (luma_ne + luma_se),
    );
    let reduce = max((luma_nw + luma_ne + luma_sw + luma_se) * 0.25 * FXAA_REDUCE_MUL, FXAA_REDUCE_MIN);
    let rcp_min = 1.0 / (min(abs(dir.x), abs(dir.y)) + reduce);
    dir = clamp(dir * rcp_min, vec2<f32>(-FXAA_SPAN_MAX), vec2<f32>(FXAA_SPAN_MAX)) * params.texel_size;

    let rgb_a = 0.5 * (sample_source(uv + dir * (1.0 / 3.0 - 0.5)).xyz
        + sample_source(uv + dir * (2.0 / 3.0 - 0.5)).xyz);
    let rgb_b = rgb_a * 0.5 + 0.25 * (sample_source(uv - dir * 0.5).xyz + sample_source(uv + dir * 0.5).xyz);
    let luma_b = dot(rgb_b, LUMA);
    if luma_b < luma_min || luma_b > luma_max {
        return vec4<f32>(rgb_a, 1.0);
    }
    return vec4<f32>(rgb_b, 1.0);
}
"#
);

pub const DEBUG_GBUFFER: &str = concat!(
    fullscreen_vertex!(),
    post_params!(),
    r#"
@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let value = sample_source(in.uv);
    var color: vec3<f32>;
    switch params.channel {
        case 0: { color = (value.xyz * 0.1 + vec3<f32>(0.5)) * value.w; }
        case 1: { color = value.xyz * 0.5 + vec3<f32>(0.5); }
        case 2: { color = value.xyz; }
        default: { color = vec3<f32>(value.x); }
    }
    return vec4<f32>(clamp(color, vec3<f32>(0.0), vec3<f32>(1.0)), 1.0);
}
"#
);
