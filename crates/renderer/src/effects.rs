//! Uniform contracts of the effect and finishing programs, and assembly of
//! the ordered value lists they consume.

use std::borrow::Cow;

use crate::mesh::{MESH_ATTRIBUTES, MESH_STRIDES};
use crate::params::{param_spec, ParamSnapshot, ParamValue};
use crate::program::ProgramSpec;
use crate::shaders;
use crate::types::BlendMode;
use crate::uniforms::{UniformType, UniformValue};

/// Uniforms of the effect program, in declaration order.
pub const EFFECT_UNIFORMS: [(&str, UniformType); 26] = [
    ("uResolution", UniformType::Vec2),
    ("uImageAspect", UniformType::Float),
    ("uMouse", UniformType::Vec2),
    ("uCrevice", UniformType::Vec2),
    ("uVertexScale", UniformType::Float),
    ("uTime", UniformType::Float),
    ("uTemperature", UniformType::Float),
    ("uTint", UniformType::Float),
    ("uContrast", UniformType::Float),
    ("uHSV", UniformType::Vec3),
    ("uSobel", UniformType::Float),
    ("uMosaic", UniformType::Float),
    ("uBayer", UniformType::Float),
    ("uToon", UniformType::Float),
    ("uToonMin", UniformType::Float),
    ("uToonMax", UniformType::Float),
    ("uShift", UniformType::Vec2),
    ("shiftScale", UniformType::Float),
    ("uVignette", UniformType::Float),
    ("uVignetteScale", UniformType::Float),
    ("uNoiseIntensity", UniformType::Vec2),
    ("uNoiseScale", UniformType::Vec2),
    ("uNoiseTime", UniformType::Float),
    ("uSNoiseIntensity", UniformType::Vec2),
    ("uSNoiseScale", UniformType::Vec2),
    ("uSNoiseTime", UniformType::Float),
];

/// Uniforms of the finishing program, in declaration order.
pub const FINISH_UNIFORMS: [(&str, UniformType); 6] = [
    ("uResolution", UniformType::Vec2),
    ("uImageAspect", UniformType::Float),
    ("uMouse", UniformType::Vec2),
    ("uCrevice", UniformType::Vec2),
    ("uVertexScale", UniformType::Float),
    ("uBlendMode", UniformType::Int),
];

/// The four programs the pipeline draws with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProgramKind {
    /// Effect pass fitted to the window aspect ratio.
    Effect,
    /// Effect pass filling its target; used for exports and offscreen layers.
    EffectExport,
    /// Finishing pass fitted to the window aspect ratio.
    Finish,
    /// Finishing pass filling its target.
    FinishExport,
}

impl ProgramKind {
    pub const ALL: [ProgramKind; 4] = [
        ProgramKind::Effect,
        ProgramKind::EffectExport,
        ProgramKind::Finish,
        ProgramKind::FinishExport,
    ];

    pub fn label(self) -> &'static str {
        match self {
            ProgramKind::Effect => "effect",
            ProgramKind::EffectExport => "effect export",
            ProgramKind::Finish => "finish",
            ProgramKind::FinishExport => "finish export",
        }
    }

    pub fn is_finish(self) -> bool {
        matches!(self, ProgramKind::Finish | ProgramKind::FinishExport)
    }

    /// The declared contract for this program.
    pub fn spec(self) -> ProgramSpec {
        let (vertex, fragment, uniforms): (String, String, &[(&str, UniformType)]) = match self {
            ProgramKind::Effect => (
                shaders::effect_vertex(false),
                shaders::effect_fragment(),
                &EFFECT_UNIFORMS,
            ),
            ProgramKind::EffectExport => (
                shaders::effect_vertex(true),
                shaders::effect_fragment(),
                &EFFECT_UNIFORMS,
            ),
            ProgramKind::Finish => (
                shaders::finish_vertex(false),
                shaders::finish_fragment(),
                &FINISH_UNIFORMS,
            ),
            ProgramKind::FinishExport => (
                shaders::finish_vertex(true),
                shaders::finish_fragment(),
                &FINISH_UNIFORMS,
            ),
        };

        ProgramSpec {
            label: self.label().to_string(),
            vertex_source: Cow::Owned(vertex),
            fragment_source: Cow::Owned(fragment),
            attribute_names: MESH_ATTRIBUTES.iter().map(|name| name.to_string()).collect(),
            strides: MESH_STRIDES.to_vec(),
            uniform_names: Some(uniforms.iter().map(|(name, _)| name.to_string()).collect()),
            uniform_types: Some(uniforms.iter().map(|(_, ty)| *ty).collect()),
        }
    }
}

/// Per-pass geometry and timing inputs shared by both programs.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PassView {
    /// Size of the render target in pixels.
    pub resolution: [f32; 2],
    /// Native width / height of the source image.
    pub image_aspect: f32,
    /// Pointer in normalized device coordinates.
    pub mouse: [f32; 2],
    pub crevice: [f32; 2],
    pub vertex_scale: f32,
    pub time: f32,
}

impl PassView {
    /// Geometry-neutral view used for offscreen layers: no crevice, no
    /// scaling, target at the image's native size.
    pub fn layer(native_size: (u32, u32), image_aspect: f32, mouse: [f32; 2], time: f32) -> Self {
        Self {
            resolution: [native_size.0 as f32, native_size.1 as f32],
            image_aspect,
            mouse,
            crevice: [0.0, 0.0],
            vertex_scale: 1.0,
            time,
        }
    }
}

/// Builds the effect program's value list from a layer snapshot.
///
/// Effects whose toggle is off are sent their disabled sentinel instead of
/// the stored value.
pub fn effect_uniforms(view: &PassView, params: &ParamSnapshot) -> Vec<UniformValue> {
    let reader = Reader(params);
    let on = |toggle: &str| reader.toggle(toggle);

    let temperature = if on("isTemperature") { reader.number("uTemperature") } else { 0.0 };
    let tint = if on("isTint") { reader.number("uTint") } else { 0.0 };
    let contrast = if on("isContrast") { reader.number("uContrast") } else { 0.5 };
    let hsv = if on("isHSV") { reader.vec3("uHSV") } else { [0.0; 3] };
    let sobel = if on("isSobel") { reader.number("uSobel") } else { 0.0 };
    let mosaic = if on("isMosaic") { reader.number("uMosaic") } else { -1.0 };
    let bayer = if on("isBayer") { reader.number("uBayer") } else { -1.0 };
    let toon = if on("isToon") { reader.number("uToon") } else { -1.0 };
    let shift = if on("isShift") { reader.vec2("uShift") } else { [0.0; 2] };
    let vignette = if on("isVignette") { reader.number("uVignette") } else { 0.0 };
    let noise = if on("isNoise") { reader.vec2("uNoiseIntensity") } else { [0.0; 2] };
    let snoise = if on("isSNoise") { reader.vec2("uSNoiseIntensity") } else { [0.0; 2] };

    vec![
        UniformValue::Vec2(view.resolution),
        UniformValue::Float(view.image_aspect),
        UniformValue::Vec2(view.mouse),
        UniformValue::Vec2(view.crevice),
        UniformValue::Float(view.vertex_scale),
        UniformValue::Float(view.time),
        UniformValue::Float(temperature),
        UniformValue::Float(tint),
        UniformValue::Float(contrast),
        UniformValue::Vec3(hsv),
        UniformValue::Float(sobel),
        UniformValue::Float(mosaic),
        UniformValue::Float(bayer),
        UniformValue::Float(toon),
        UniformValue::Float(reader.number("uToonMin")),
        UniformValue::Float(reader.number("uToonMax")),
        UniformValue::Vec2(shift),
        UniformValue::Float(reader.number("shiftScale")),
        UniformValue::Float(vignette),
        UniformValue::Float(reader.number("uVignetteScale")),
        UniformValue::Vec2(noise),
        UniformValue::Vec2(reader.vec2("uNoiseScale")),
        UniformValue::Float(reader.number("uNoiseTime")),
        UniformValue::Vec2(snoise),
        UniformValue::Vec2(reader.vec2("uSNoiseScale")),
        UniformValue::Float(reader.number("uSNoiseTime")),
    ]
}

/// Builds the finishing program's value list.
pub fn finish_uniforms(view: &PassView, blend: BlendMode) -> Vec<UniformValue> {
    vec![
        UniformValue::Vec2(view.resolution),
        UniformValue::Float(view.image_aspect),
        UniformValue::Vec2(view.mouse),
        UniformValue::Vec2(view.crevice),
        UniformValue::Float(view.vertex_scale),
        UniformValue::Int(blend.shader_index()),
    ]
}

/// Reads snapshot values, falling back to the catalogue default when a key
/// is missing or holds the wrong shape.
struct Reader<'a>(&'a ParamSnapshot);

impl Reader<'_> {
    fn value(&self, key: &str) -> Option<ParamValue> {
        self.0
            .get(key)
            .cloned()
            .or_else(|| param_spec(key).map(|spec| spec.default.value()))
    }

    fn number(&self, key: &str) -> f32 {
        match self.value(key) {
            Some(ParamValue::Number(value)) => value as f32,
            _ => default_number(key),
        }
    }

    fn toggle(&self, key: &str) -> bool {
        self.value(key).and_then(|value| value.as_toggle()).unwrap_or(false)
    }

    fn components<const N: usize>(&self, key: &str) -> [f32; N] {
        let from = |value: Option<ParamValue>| -> Option<[f32; N]> {
            let values = value?.as_vector()?.to_vec();
            if values.len() != N {
                return None;
            }
            let mut out = [0.0; N];
            for (slot, value) in out.iter_mut().zip(values) {
                *slot = value as f32;
            }
            Some(out)
        };
        from(self.value(key))
            .or_else(|| from(param_spec(key).map(|spec| spec.default.value())))
            .unwrap_or([0.0; N])
    }

    fn vec2(&self, key: &str) -> [f32; 2] {
        self.components(key)
    }

    fn vec3(&self, key: &str) -> [f32; 3] {
        self.components(key)
    }
}

fn default_number(key: &str) -> f32 {
    param_spec(key)
        .and_then(|spec| spec.default.value().as_number())
        .unwrap_or(0.0) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{default_snapshot, KeyPolicy, ParameterStore};
    use crate::program::ProgramLayout;

    fn view() -> PassView {
        PassView {
            resolution: [800.0, 600.0],
            image_aspect: 1.5,
            mouse: [0.25, -0.5],
            crevice: [0.2, 0.1],
            vertex_scale: 0.9,
            time: 2.0,
        }
    }

    fn slot(values: &[UniformValue], name: &str) -> UniformValue {
        let index = EFFECT_UNIFORMS
            .iter()
            .position(|(uniform, _)| *uniform == name)
            .unwrap();
        values[index].clone()
    }

    #[test]
    fn every_program_compiles_with_a_fully_resolved_contract() {
        for kind in ProgramKind::ALL {
            let layout = ProgramLayout::build(kind.spec()).unwrap();
            assert!(
                layout.uniform_block().unresolved().is_empty(),
                "{}: {:?}",
                kind.label(),
                layout.uniform_block().unresolved()
            );
            assert!(layout.attribute_locations().iter().all(Option::is_some));
            let expected_textures = if kind.is_finish() { 2 } else { 1 };
            assert_eq!(layout.interface().textures.len(), expected_textures);
            assert_eq!(layout.interface().samplers.len(), expected_textures);
        }
    }

    #[test]
    fn assembled_values_match_declared_types() {
        let values = effect_uniforms(&view(), &default_snapshot());
        assert_eq!(values.len(), EFFECT_UNIFORMS.len());
        for (value, (name, ty)) in values.iter().zip(EFFECT_UNIFORMS) {
            assert_eq!(value.kind(), ty, "{name}");
        }

        let finish = finish_uniforms(&view(), BlendMode::Screen);
        assert_eq!(finish.len(), FINISH_UNIFORMS.len());
        for (value, (name, ty)) in finish.iter().zip(FINISH_UNIFORMS) {
            assert_eq!(value.kind(), ty, "{name}");
        }
        assert_eq!(finish[5], UniformValue::Int(6));
    }

    #[test]
    fn disabled_effects_send_sentinels() {
        let mut store = ParameterStore::new("first", KeyPolicy::Strict);
        store.set("uMosaic", 42.0.into()).unwrap();
        store.set("uHSV", vec![0.3, 0.2, 0.1].into()).unwrap();
        store.set("isHSV", false.into()).unwrap();
        store.set("uShift", vec![0.5, 0.5].into()).unwrap();
        store.set("uVignette", 2.0.into()).unwrap();
        store.set("uToon", 4.0.into()).unwrap();
        store.set("uContrast", 0.9.into()).unwrap();
        store.set("isContrast", false.into()).unwrap();

        let values = effect_uniforms(&view(), &store.get());
        assert_eq!(slot(&values, "uMosaic"), UniformValue::Float(-1.0));
        assert_eq!(slot(&values, "uBayer"), UniformValue::Float(-1.0));
        assert_eq!(slot(&values, "uToon"), UniformValue::Float(-1.0));
        assert_eq!(slot(&values, "uHSV"), UniformValue::Vec3([0.0, 0.0, 0.0]));
        assert_eq!(slot(&values, "uShift"), UniformValue::Vec2([0.0, 0.0]));
        assert_eq!(slot(&values, "uVignette"), UniformValue::Float(0.0));
        assert_eq!(slot(&values, "uSobel"), UniformValue::Float(0.0));
        assert_eq!(slot(&values, "uContrast"), UniformValue::Float(0.5));
        assert_eq!(slot(&values, "uNoiseIntensity"), UniformValue::Vec2([0.0, 0.0]));
        assert_eq!(slot(&values, "uSNoiseIntensity"), UniformValue::Vec2([0.0, 0.0]));
    }

    #[test]
    fn enabled_effects_pass_stored_values() {
        let mut store = ParameterStore::new("first", KeyPolicy::Strict);
        store.set("uMosaic", 42.0.into()).unwrap();
        store.set("isMosaic", true.into()).unwrap();
        store.set("uHSV", vec![0.5, 0.25, 0.0].into()).unwrap();
        store.set("uNoiseIntensity", vec![0.5, 0.25].into()).unwrap();
        store.set("isNoise", true.into()).unwrap();

        let values = effect_uniforms(&view(), &store.get());
        assert_eq!(slot(&values, "uMosaic"), UniformValue::Float(42.0));
        assert_eq!(slot(&values, "uHSV"), UniformValue::Vec3([0.5, 0.25, 0.0]));
        assert_eq!(slot(&values, "uNoiseIntensity"), UniformValue::Vec2([0.5, 0.25]));
        assert_eq!(slot(&values, "uCrevice"), UniformValue::Vec2([0.2, 0.1]));
        assert_eq!(slot(&values, "uTime"), UniformValue::Float(2.0));
    }

    #[test]
    fn missing_or_malformed_keys_fall_back_to_defaults() {
        let mut snapshot = ParamSnapshot::new();
        snapshot.insert("uNoiseScale".into(), ParamValue::Number(3.0));
        snapshot.insert("isContrast".into(), ParamValue::Toggle(true));
        let values = effect_uniforms(&view(), &snapshot);
        assert_eq!(slot(&values, "uNoiseScale"), UniformValue::Vec2([1.0, 1.0]));
        assert_eq!(slot(&values, "uContrast"), UniformValue::Float(0.5));
        assert_eq!(slot(&values, "uVignetteScale"), UniformValue::Float(1.0));
    }

    #[test]
    fn layer_view_is_geometry_neutral() {
        let view = PassView::layer((300, 450), 300.0 / 450.0, [0.1, 0.2], 1.0);
        assert_eq!(view.resolution, [300.0, 450.0]);
        assert_eq!(view.crevice, [0.0, 0.0]);
        assert_eq!(view.vertex_scale, 1.0);
    }
}
