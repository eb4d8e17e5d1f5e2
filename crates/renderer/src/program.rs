use std::borrow::Cow;

use crate::compile::{compile_program, ProgramInterface};
use crate::error::{RenderError, Result};
use crate::uniforms::{UniformBlock, UniformType};

/// Declared contract of a GPU program: its sources plus the attribute and
/// uniform lists callers will feed it, in order.
#[derive(Clone, Debug)]
pub struct ProgramSpec {
    pub label: String,
    pub vertex_source: Cow<'static, str>,
    pub fragment_source: Cow<'static, str>,
    pub attribute_names: Vec<String>,
    /// Components per attribute, parallel to `attribute_names`.
    pub strides: Vec<u32>,
    pub uniform_names: Option<Vec<String>>,
    /// Parallel to `uniform_names`; both absent means "no uniforms".
    pub uniform_types: Option<Vec<UniformType>>,
}

impl ProgramSpec {
    /// Checks list arities without touching the compiler.
    pub fn validate(&self) -> Result<()> {
        if self.attribute_names.len() != self.strides.len() {
            return Err(RenderError::SpecMismatch(format!(
                "{}: {} attribute names but {} strides",
                self.label,
                self.attribute_names.len(),
                self.strides.len()
            )));
        }
        if let Some((name, stride)) = self
            .attribute_names
            .iter()
            .zip(&self.strides)
            .find(|(_, stride)| !(1..=4).contains(*stride))
        {
            return Err(RenderError::SpecMismatch(format!(
                "{}: attribute `{name}` has unsupported stride {stride}",
                self.label
            )));
        }
        match (&self.uniform_names, &self.uniform_types) {
            (None, None) => Ok(()),
            (Some(names), Some(types)) if names.len() == types.len() => Ok(()),
            (Some(names), Some(types)) => Err(RenderError::SpecMismatch(format!(
                "{}: {} uniform names but {} uniform types",
                self.label,
                names.len(),
                types.len()
            ))),
            _ => Err(RenderError::SpecMismatch(format!(
                "{}: uniform names and types must be declared together",
                self.label
            ))),
        }
    }

    pub fn declared_uniforms(&self) -> Vec<(String, UniformType)> {
        match (&self.uniform_names, &self.uniform_types) {
            (Some(names), Some(types)) => names.iter().cloned().zip(types.iter().copied()).collect(),
            _ => Vec::new(),
        }
    }
}

/// A validated, compiled and resolved program, independent of any device.
#[derive(Clone, Debug)]
pub struct ProgramLayout {
    spec: ProgramSpec,
    interface: ProgramInterface,
    attribute_locations: Vec<Option<u32>>,
}

impl ProgramLayout {
    /// Checks the arity of `spec`, then compiles and resolves attribute locations.
    ///
    /// Arity problems are reported before compilation starts.
    pub fn build(spec: ProgramSpec) -> Result<Self> {
        spec.validate()?;
        let interface = compile_program(&spec.vertex_source, &spec.fragment_source)?;

        let mut attribute_locations = Vec::with_capacity(spec.attribute_names.len());
        for (name, stride) in spec.attribute_names.iter().zip(&spec.strides) {
            let input = interface.vertex_inputs.iter().find(|input| &input.name == name);
            match input {
                Some(input) => {
                    if input.components != *stride {
                        tracing::warn!(
                            program = %spec.label,
                            attribute = %name,
                            stride,
                            shader_components = input.components,
                            "attribute stride differs from shader declaration"
                        );
                    }
                    attribute_locations.push(Some(input.location));
                }
                None => {
                    tracing::warn!(
                        program = %spec.label,
                        attribute = %name,
                        "attribute not found in vertex shader; its buffer will be ignored"
                    );
                    attribute_locations.push(None);
                }
            }
        }

        tracing::debug!(
            program = %spec.label,
            attributes = spec.attribute_names.len(),
            uniforms = spec.declared_uniforms().len(),
            "program compiled"
        );

        Ok(Self {
            spec,
            interface,
            attribute_locations,
        })
    }

    pub fn label(&self) -> &str {
        &self.spec.label
    }

    pub fn spec(&self) -> &ProgramSpec {
        &self.spec
    }

    pub fn interface(&self) -> &ProgramInterface {
        &self.interface
    }

    /// Shader location per declared attribute, `None` when unresolved.
    pub fn attribute_locations(&self) -> &[Option<u32>] {
        &self.attribute_locations
    }

    /// Fresh staging block for this program's uniforms.
    pub fn uniform_block(&self) -> UniformBlock {
        UniformBlock::resolve(
            &self.spec.label,
            &self.spec.declared_uniforms(),
            &self.interface.uniforms,
        )
    }

    /// Fails when `buffers` does not match the declared attribute count.
    pub fn check_attribute_buffers(&self, buffers: usize) -> Result<()> {
        if buffers != self.spec.attribute_names.len() {
            return Err(RenderError::SpecMismatch(format!(
                "{}: {} attribute buffers supplied for {} attributes",
                self.spec.label,
                buffers,
                self.spec.attribute_names.len()
            )));
        }
        Ok(())
    }
}
