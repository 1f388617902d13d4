//! Registry of converter and linter modules.
//!
//! A module is a deployed worker function plus a capability record saying
//! what it can take in and produce. Splitting consults the registry once
//! per part; a part with no matching converter fails without dispatching.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The role a module plays in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleKind {
    /// Converts source content into the requested output format.
    Converter,
    /// Checks source content and reports warnings.
    Linter,
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Converter => "converter",
            Self::Linter => "linter",
        };
        write!(f, "{s}")
    }
}

/// Capability record for one deployed module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleSpec {
    /// Module name; the invoked function is derived from it.
    pub name: String,
    /// Converter or linter.
    pub kind: ModuleKind,
    /// Resource types the module accepts (e.g. `ulb`, `obs`).
    pub resource_types: Vec<String>,
    /// Input formats the module accepts (e.g. `usfm`, `md`).
    pub input_formats: Vec<String>,
    /// Output formats the module produces (e.g. `html`). Empty for linters.
    pub output_formats: Vec<String>,
}

impl ModuleSpec {
    /// Creates a capability record.
    #[must_use]
    pub fn new<S, R, I, O>(
        name: S,
        kind: ModuleKind,
        resource_types: R,
        input_formats: I,
        output_formats: O,
    ) -> Self
    where
        S: Into<String>,
        R: IntoIterator,
        R::Item: Into<String>,
        I: IntoIterator,
        I::Item: Into<String>,
        O: IntoIterator,
        O::Item: Into<String>,
    {
        Self {
            name: name.into(),
            kind,
            resource_types: resource_types.into_iter().map(Into::into).collect(),
            input_formats: input_formats.into_iter().map(Into::into).collect(),
            output_formats: output_formats.into_iter().map(Into::into).collect(),
        }
    }

    fn handles_resource(&self, resource_type: &str) -> bool {
        self.resource_types
            .iter()
            .any(|r| r.eq_ignore_ascii_case(resource_type))
    }
}

/// In-memory module registry, read-only after construction.
#[derive(Debug, Clone, Default)]
pub struct ModuleRegistry {
    modules: Vec<ModuleSpec>,
}

impl ModuleRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a module. Registration order is lookup precedence.
    pub fn register(&mut self, spec: ModuleSpec) {
        self.modules.push(spec);
    }

    /// Finds the first converter handling the given triple.
    #[must_use]
    pub fn find_converter(
        &self,
        resource_type: &str,
        input_format: &str,
        output_format: &str,
    ) -> Option<&ModuleSpec> {
        self.modules.iter().find(|m| {
            m.kind == ModuleKind::Converter
                && m.handles_resource(resource_type)
                && m.input_formats
                    .iter()
                    .any(|f| f.eq_ignore_ascii_case(input_format))
                && m.output_formats
                    .iter()
                    .any(|f| f.eq_ignore_ascii_case(output_format))
        })
    }

    /// Finds the first linter handling a resource type.
    #[must_use]
    pub fn find_linter(&self, resource_type: &str) -> Option<&ModuleSpec> {
        self.modules
            .iter()
            .find(|m| m.kind == ModuleKind::Linter && m.handles_resource(resource_type))
    }
}
