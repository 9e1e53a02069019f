//! Light components
//!
//! Position and direction come from the [`super::Transform`] on the same entity;
//! directional and spot lights shine along the transform's forward axis.

use bevy_ecs::prelude::*;
use glam::{Mat4, Vec3};

/// Number of intensity steps of an 8-bit channel. A light's range ends where its
/// contribution falls below one step.
pub const LIGHT_CUTOFF_LEVELS: f32 = 255.0;

/// Range used when attenuation never falls off
pub const MAX_LIGHT_RANGE: f32 = 1000.0;

/// Lower bound on light range so volumes never collapse
pub const MIN_LIGHT_RANGE: f32 = 1e-3;

/// Widest spot cone half-angle, in degrees. A cone volume cannot bound a
/// light that reaches 90 degrees or more off its axis.
pub const MAX_SPOT_HALF_ANGLE_DEGREES: f32 = 89.0;

/// Half-angle in radians of a spot cone with cosine `cutoff`, limited to
/// [`MAX_SPOT_HALF_ANGLE_DEGREES`]
pub fn spot_half_angle(cutoff: f32) -> f32 {
    cutoff
        .clamp(-1.0, 1.0)
        .acos()
        .min(MAX_SPOT_HALF_ANGLE_DEGREES.to_radians())
}

/// `1 / (constant + linear * d + quadratic * d^2)` falloff
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Attenuation {
    pub constant: f32,
    pub linear: f32,
    pub quadratic: f32,
}

impl Default for Attenuation {
    fn default() -> Self {
        Self {
            constant: 1.0,
            linear: 0.09,
            quadratic: 0.032,
        }
    }
}

impl Attenuation {
    pub fn new(constant: f32, linear: f32, quadratic: f32) -> Self {
        Self {
            constant,
            linear,
            quadratic,
        }
    }

    pub fn factor(&self, distance: f32) -> f32 {
        let denom = self.constant + self.linear * distance + self.quadratic * distance * distance;
        if denom <= 0.0 {
            1.0
        } else {
            1.0 / denom
        }
    }
}

/// Distance at which `attenuation(d) * intensity * max(color)` drops to
/// `1 / LIGHT_CUTOFF_LEVELS`.
///
/// Solves `quadratic * d^2 + linear * d + constant = LIGHT_CUTOFF_LEVELS * intensity * max(color)`
/// for its positive root. Without a quadratic term the linear equation is solved;
/// without either the light never falls off and [`MAX_LIGHT_RANGE`] is returned.
/// The result is clamped to `[MIN_LIGHT_RANGE, MAX_LIGHT_RANGE]`.
pub fn light_range(color: Vec3, intensity: f32, attenuation: &Attenuation) -> f32 {
    let target = LIGHT_CUTOFF_LEVELS * intensity * color.max_element();
    let Attenuation {
        constant,
        linear,
        quadratic,
    } = *attenuation;

    let range = if quadratic > 0.0 {
        let discriminant = linear * linear - 4.0 * quadratic * (constant - target);
        if discriminant < 0.0 {
            MIN_LIGHT_RANGE
        } else {
            (-linear + discriminant.sqrt()) / (2.0 * quadratic)
        }
    } else if linear > 0.0 {
        (target - constant) / linear
    } else if target > constant {
        MAX_LIGHT_RANGE
    } else {
        MIN_LIGHT_RANGE
    };

    range.clamp(MIN_LIGHT_RANGE, MAX_LIGHT_RANGE)
}

/// Shadow participation and the light-space projection used by the last shadow pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowInfo {
    pub casts_shadows: bool,
    pub projection: Mat4,
}

impl Default for ShadowInfo {
    fn default() -> Self {
        Self {
            casts_shadows: true,
            projection: Mat4::IDENTITY,
        }
    }
}

impl ShadowInfo {
    pub fn disabled() -> Self {
        Self {
            casts_shadows: false,
            ..Default::default()
        }
    }
}

/// Directional light component (like the sun)
#[derive(Component, Debug, Clone)]
pub struct DirectionalLight {
    pub color: Vec3,
    pub intensity: f32,
    /// Half extent of the orthographic shadow frustum
    pub half_size: f32,
    pub shadow: ShadowInfo,
}

impl Default for DirectionalLight {
    fn default() -> Self {
        Self {
            color: Vec3::ONE,
            intensity: 1.0,
            half_size: 20.0,
            shadow: ShadowInfo::default(),
        }
    }
}

impl DirectionalLight {
    pub fn new(color: Vec3, intensity: f32) -> Self {
        Self {
            color,
            intensity,
            ..Default::default()
        }
    }

    pub fn with_half_size(mut self, half_size: f32) -> Self {
        self.half_size = half_size;
        self
    }

    pub fn with_shadows(mut self, casts_shadows: bool) -> Self {
        self.shadow.casts_shadows = casts_shadows;
        self
    }
}

/// Point light component
#[derive(Component, Debug, Clone)]
pub struct PointLight {
    pub color: Vec3,
    pub intensity: f32,
    pub attenuation: Attenuation,
    pub shadow: ShadowInfo,
}

impl Default for PointLight {
    fn default() -> Self {
        Self {
            color: Vec3::ONE,
            intensity: 1.0,
            attenuation: Attenuation::default(),
            shadow: ShadowInfo::default(),
        }
    }
}

impl PointLight {
    pub fn new(color: Vec3, intensity: f32, attenuation: Attenuation) -> Self {
        Self {
            color,
            intensity,
            attenuation,
            ..Default::default()
        }
    }

    pub fn with_shadows(mut self, casts_shadows: bool) -> Self {
        self.shadow.casts_shadows = casts_shadows;
        self
    }

    /// Radius of the light volume, derived from the current values
    pub fn range(&self) -> f32 {
        light_range(self.color, self.intensity, &self.attenuation)
    }
}

/// Spot light component
#[derive(Component, Debug, Clone)]
pub struct SpotLight {
    pub color: Vec3,
    pub intensity: f32,
    pub attenuation: Attenuation,
    /// Cosine of the half-angle of the cone. Half-angles beyond
    /// [`MAX_SPOT_HALF_ANGLE_DEGREES`] are rendered as that limit.
    pub cutoff: f32,
    pub shadow: ShadowInfo,
}

impl Default for SpotLight {
    fn default() -> Self {
        Self {
            color: Vec3::ONE,
            intensity: 1.0,
            attenuation: Attenuation::default(),
            cutoff: 25f32.to_radians().cos(),
            shadow: ShadowInfo::default(),
        }
    }
}

impl SpotLight {
    pub fn new(color: Vec3, intensity: f32, attenuation: Attenuation, half_angle_degrees: f32) -> Self {
        Self {
            color,
            intensity,
            attenuation,
            cutoff: half_angle_degrees.to_radians().cos(),
            ..Default::default()
        }
    }

    pub fn with_shadows(mut self, casts_shadows: bool) -> Self {
        self.shadow.casts_shadows = casts_shadows;
        self
    }

    /// Half-angle of the cone in radians, as rendered
    pub fn half_angle(&self) -> f32 {
        spot_half_angle(self.cutoff)
    }

    /// Cosine of [`SpotLight::half_angle`]
    pub fn effective_cutoff(&self) -> f32 {
        self.half_angle().cos()
    }

    /// Length of the light volume, derived from the current values
    pub fn range(&self) -> f32 {
        light_range(self.color, self.intensity, &self.attenuation)
    }

    /// Base radius of the cone volume at `range`
    pub fn cone_radius(&self) -> f32 {
        self.range() * self.half_angle().tan()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reaches_threshold(color: Vec3, intensity: f32, attenuation: Attenuation) {
        let range = light_range(color, intensity, &attenuation);
        assert!(range > 0.0);
        let level = attenuation.factor(range) * intensity * color.max_element();
        assert!(
            (level - 1.0 / LIGHT_CUTOFF_LEVELS).abs() < 1e-5,
            "range {range} gives level {level}"
        );
    }

    #[test]
    fn test_range_matches_cutoff_level() {
        reaches_threshold(Vec3::ONE, 1.0, Attenuation::default());
        reaches_threshold(Vec3::new(0.2, 0.9, 0.4), 3.0, Attenuation::new(1.0, 0.7, 1.8));
        reaches_threshold(Vec3::new(1.0, 0.5, 0.0), 0.5, Attenuation::new(0.5, 0.0, 0.1));
    }

    #[test]
    fn test_linear_only_attenuation() {
        let attenuation = Attenuation::new(1.0, 0.5, 0.0);
        reaches_threshold(Vec3::ONE, 1.0, attenuation);
        assert!((light_range(Vec3::ONE, 1.0, &attenuation) - 508.0).abs() < 1e-3);
    }

    #[test]
    fn test_constant_attenuation_never_falls_off() {
        let attenuation = Attenuation::new(1.0, 0.0, 0.0);
        assert_eq!(light_range(Vec3::ONE, 1.0, &attenuation), MAX_LIGHT_RANGE);
    }

    #[test]
    fn test_dim_light_range_is_still_positive() {
        let attenuation = Attenuation::new(1.0, 0.09, 0.032);
        let range = light_range(Vec3::splat(0.001), 1.0, &attenuation);
        assert!(range >= MIN_LIGHT_RANGE);
    }

    #[test]
    fn test_wide_spot_cone_is_clamped() {
        let light = SpotLight::new(Vec3::ONE, 1.0, Attenuation::default(), 120.0);
        assert!((light.half_angle() - MAX_SPOT_HALF_ANGLE_DEGREES.to_radians()).abs() < 1e-6);
        assert!(light.effective_cutoff() > 0.0);
        assert!(light.cone_radius().is_finite() && light.cone_radius() > 0.0);

        let narrow = SpotLight::new(Vec3::ONE, 1.0, Attenuation::default(), 30.0);
        assert!((narrow.half_angle() - 30f32.to_radians()).abs() < 1e-5);
    }

    #[test]
    fn test_range_tracks_component_changes() {
        let mut light = PointLight::default();
        let before = light.range();
        light.intensity *= 4.0;
        assert!(light.range() > before);
        light.attenuation.quadratic *= 10.0;
        assert!(light.range() < light_range(light.color, light.intensity, &Attenuation::default()));
    }

    #[test]
    fn test_spot_cone_radius() {
        let spot = SpotLight::new(Vec3::ONE, 1.0, Attenuation::default(), 45.0);
        assert!((spot.cone_radius() - spot.range()).abs() < 1e-3);
    }
}
