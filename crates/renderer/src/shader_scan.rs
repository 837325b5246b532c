//! Discovery of the binding sets a shader needs.
//!
//! Shader sources name the resource groups they use with include markers:
//!
//! ```glsl
//! #include Camera
//! #include <Lights>
//! #include "Materials"
//! ```
//!
//! Each name is mapped to a binding set index through a [`BindingRegistry`].

use std::collections::HashMap;

use crate::error::{RenderError, RenderResult};

/// Maps resource group names used in shader markers to binding set indices.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BindingRegistry {
    sets: HashMap<String, u32>,
}

impl Default for BindingRegistry {
    /// Registry with the camera uniforms at set 0.
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("Camera", 0);
        registry
    }
}

impl BindingRegistry {
    pub fn empty() -> Self {
        Self {
            sets: HashMap::new(),
        }
    }

    /// Registers `name`, replacing any previous index for it.
    pub fn register(&mut self, name: impl Into<String>, set_index: u32) -> &mut Self {
        self.sets.insert(name.into(), set_index);
        self
    }

    pub fn lookup(&self, name: &str) -> RenderResult<u32> {
        self.sets.get(name).copied().ok_or_else(|| {
            RenderError::config(format!("No binding set is registered as '{}'", name))
        })
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}

/// Names referenced by include markers, in source order.
pub fn marker_names(source: &str) -> Vec<&str> {
    source
        .lines()
        .filter_map(|line| line.trim_start().strip_prefix("#include"))
        .filter_map(|rest| {
            let rest = rest.trim();
            let name = rest
                .strip_prefix('<')
                .and_then(|r| r.strip_suffix('>'))
                .or_else(|| rest.strip_prefix('"').and_then(|r| r.strip_suffix('"')))
                .unwrap_or(rest)
                .trim();
            (!name.is_empty()).then_some(name)
        })
        .collect()
}

/// Accumulates the set indices required by one or more shader sources.
///
/// Indices are deduplicated and kept in first-seen order across sources.
#[derive(Debug)]
pub struct RequiredSets<'r> {
    registry: &'r BindingRegistry,
    indices: Vec<u32>,
}

impl<'r> RequiredSets<'r> {
    pub fn new(registry: &'r BindingRegistry) -> Self {
        Self {
            registry,
            indices: Vec::new(),
        }
    }

    /// Scans one source; an unregistered name fails the whole scan.
    pub fn scan(&mut self, source: &str) -> RenderResult<()> {
        for name in marker_names(source) {
            let index = self.registry.lookup(name)?;
            if !self.indices.contains(&index) {
                self.indices.push(index);
            }
        }
        Ok(())
    }

    /// Finishes the scan, checking every index against the number of
    /// binding sets available.
    pub fn finish(self, available: usize) -> RenderResult<Vec<u32>> {
        if let Some(&index) = self.indices.iter().find(|&&i| i as usize >= available) {
            return Err(RenderError::config(format!(
                "Shader requires binding set {} but only {} are provided",
                index, available
            )));
        }
        Ok(self.indices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_forms() {
        let source = "#version 450\n\
                      #include Camera\n\
                      #include <Lights>\n\
                      #include \"Materials\"\n\
                      layout(location = 0) out vec4 color;\n";
        assert_eq!(marker_names(source), vec!["Camera", "Lights", "Materials"]);
    }

    #[test]
    fn test_non_markers_ignored() {
        let source = "// #include Camera is commented out\n#define INCLUDE 1\n#include\n";
        assert!(marker_names(source).is_empty());
    }

    #[test]
    fn test_default_registry() {
        let registry = BindingRegistry::default();
        assert_eq!(registry.lookup("Camera").unwrap(), 0);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unknown_name_is_configuration_error() {
        let registry = BindingRegistry::default();
        let mut required = RequiredSets::new(&registry);
        assert!(matches!(
            required.scan("#include Shadows\n"),
            Err(RenderError::Configuration(_))
        ));
    }

    #[test]
    fn test_dedup_first_seen_order_across_files() {
        let mut registry = BindingRegistry::empty();
        registry.register("Camera", 0).register("Lights", 2).register("Materials", 1);

        let mut required = RequiredSets::new(&registry);
        required.scan("#include Lights\n#include Camera\n").unwrap();
        required.scan("#include Camera\n#include Materials\n#include Lights\n").unwrap();
        assert_eq!(required.finish(3).unwrap(), vec![2, 0, 1]);
    }

    #[test]
    fn test_index_beyond_available_sets() {
        let mut registry = BindingRegistry::default();
        registry.register("Lights", 1);
        let mut required = RequiredSets::new(&registry);
        required.scan("#include Camera\n#include Lights\n").unwrap();
        assert!(matches!(
            required.finish(1),
            Err(RenderError::Configuration(_))
        ));
    }
}
