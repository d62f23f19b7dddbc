//! Render-material classification from part names.
//!
//! Part names coming out of CAD packages are usually descriptive
//! (`left_motor_bracket`, `front_tire`). A small ordered keyword table maps
//! them to material families. Names that match nothing get a color from the
//! harmonic generator, so unrelated parts still look distinct and the same
//! name always gets the same color.

use serde::Serialize;

/// The golden angle in degrees.
const GOLDEN_ANGLE: f64 = 137.507_764_05;

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Color {
    pub const WHITE: Color = Color::from_hex(0xffffff);
    pub const BLACK: Color = Color::from_hex(0x000000);

    pub const fn from_hex(hex: u32) -> Self {
        Self {
            r: ((hex >> 16) & 0xff) as f32 / 255.0,
            g: ((hex >> 8) & 0xff) as f32 / 255.0,
            b: (hex & 0xff) as f32 / 255.0,
        }
    }

    pub fn to_hex(&self) -> u32 {
        let channel = |c: f32| (c.clamp(0.0, 1.0) * 255.0).round() as u32;
        (channel(self.r) << 16) | (channel(self.g) << 8) | channel(self.b)
    }

    /// `h` in degrees, `s` and `l` in `0..=1`.
    pub fn from_hsl(h: f64, s: f64, l: f64) -> Self {
        let h = h.rem_euclid(360.0) / 360.0;
        if s == 0.0 {
            let v = l as f32;
            return Self { r: v, g: v, b: v };
        }
        let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
        let p = 2.0 * l - q;
        Self {
            r: hue_to_channel(p, q, h + 1.0 / 3.0) as f32,
            g: hue_to_channel(p, q, h) as f32,
            b: hue_to_channel(p, q, h - 1.0 / 3.0) as f32,
        }
    }
}

fn hue_to_channel(p: f64, q: f64, t: f64) -> f64 {
    let t = t.rem_euclid(1.0);
    if t < 1.0 / 6.0 {
        p + (q - p) * 6.0 * t
    } else if t < 0.5 {
        q
    } else if t < 2.0 / 3.0 {
        p + (q - p) * (2.0 / 3.0 - t) * 6.0
    } else {
        p
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MaterialProperties {
    pub color: Color,
    pub metalness: f32,
    pub roughness: f32,
    pub emissive: Color,
    pub emissive_intensity: f32,
    pub transparent: bool,
    pub opacity: f32,
    pub double_sided: bool,
    /// `false` means emission bypasses tone mapping.
    pub tone_mapped: bool,
}

impl MaterialProperties {
    fn base(color: Color) -> Self {
        Self {
            color,
            metalness: 0.2,
            roughness: 0.6,
            emissive: Color::BLACK,
            emissive_intensity: 0.0,
            transparent: false,
            opacity: 1.0,
            double_sided: false,
            tone_mapped: true,
        }
    }
}

/// Material families, in matching priority.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum MaterialFamily {
    Metal,
    Rubber,
    Glass,
    Light,
    Shell,
    Carbon,
    Harmonic,
}

const RULES: &[(MaterialFamily, &[&str])] = &[
    (
        MaterialFamily::Metal,
        &["metal", "frame", "chassis", "bracket", "link", "motor"],
    ),
    (
        MaterialFamily::Rubber,
        &["tire", "rubber", "tread", "wheel"],
    ),
    (
        MaterialFamily::Glass,
        &["glass", "window", "lens", "transparent", "screen"],
    ),
    (
        MaterialFamily::Light,
        &["light", "led", "lamp", "glow", "indicator"],
    ),
    (
        MaterialFamily::Shell,
        &["cover", "shell", "case", "propeller", "blade"],
    ),
    (MaterialFamily::Carbon, &["carbon"]),
];

/// Maps part names to render materials. Stateless; see [`MaterialClassifier::classify`].
#[derive(Clone, Copy, Debug, Default)]
pub struct MaterialClassifier;

impl MaterialClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn family(&self, part_name: &str) -> MaterialFamily {
        let lower = part_name.to_lowercase();
        RULES
            .iter()
            .find(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
            .map_or(MaterialFamily::Harmonic, |(family, _)| *family)
    }

    pub fn classify(&self, part_name: &str) -> MaterialProperties {
        let base_color = harmonic_color(part_name);
        let mut material = MaterialProperties::base(base_color);
        match self.family(part_name) {
            MaterialFamily::Metal => {
                material.metalness = 0.85;
                material.roughness = 0.25;
            }
            MaterialFamily::Rubber => {
                material.color = Color::from_hex(0x1a1a1a);
                material.metalness = 0.0;
                material.roughness = 0.95;
            }
            MaterialFamily::Glass => {
                material.color = Color::from_hex(0xa8d8ff);
                material.metalness = 0.1;
                material.roughness = 0.05;
                material.transparent = true;
                material.opacity = 0.3;
                material.double_sided = true;
            }
            MaterialFamily::Light => {
                material.color = Color::WHITE;
                material.emissive = base_color;
                material.emissive_intensity = 2.0;
                material.tone_mapped = false;
            }
            MaterialFamily::Shell => {
                material.metalness = 0.1;
                material.roughness = 0.2;
            }
            MaterialFamily::Carbon => {
                material.color = Color::from_hex(0x1c1c1c);
                material.metalness = 0.5;
                material.roughness = 0.5;
            }
            MaterialFamily::Harmonic => {}
        }
        material
    }
}

/// Polynomial rolling hash (`h * 31 + c`) of the lower-cased name.
pub fn name_hash(name: &str) -> u32 {
    name.to_lowercase()
        .chars()
        .fold(0u32, |h, c| h.wrapping_mul(31).wrapping_add(c as u32))
}

/// Deterministic, well-spread color for an arbitrary name.
///
/// Hue steps by the golden angle per hash unit. Saturation stays within
/// 55–75 % and lightness within 45–60 %.
pub fn harmonic_color(name: &str) -> Color {
    let hash = name_hash(name);
    let hue = (hash as f64 * GOLDEN_ANGLE) % 360.0;
    let saturation = 0.55 + (hash % 21) as f64 / 100.0;
    let lightness = 0.45 + ((hash / 21) % 16) as f64 / 100.0;
    Color::from_hsl(hue, saturation, lightness)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hsl_primaries() {
        assert_eq!(Color::from_hsl(0.0, 1.0, 0.5).to_hex(), 0xff0000);
        assert_eq!(Color::from_hsl(120.0, 1.0, 0.5).to_hex(), 0x00ff00);
        assert_eq!(Color::from_hsl(240.0, 1.0, 0.5).to_hex(), 0x0000ff);
        assert_eq!(Color::from_hsl(42.0, 0.0, 1.0).to_hex(), 0xffffff);
    }

    #[test]
    fn hash_ignores_case() {
        assert_eq!(name_hash("Base_Plate"), name_hash("base_plate"));
        assert_eq!(name_hash(""), 0);
        assert_eq!(name_hash("x"), 120);
    }
}
