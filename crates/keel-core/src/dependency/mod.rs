//! Dependency resolution module.
//!
//! Validates dependency references, propagates enabled state along
//! `enable_with` links, and linearizes the registry into the ordered list
//! the phase executor drives.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::trace;

use crate::registry::{FeatureCell, FeatureRegistry};

/// Dependency resolution errors. All of them are fatal setup errors.
#[derive(Debug, thiserror::Error)]
pub enum DependencyError {
    /// A feature references a name nobody registered.
    #[error("feature '{feature}' depends on unknown feature '{dependency}'")]
    UnknownDependency {
        /// The referencing feature.
        feature: String,
        /// The missing reference.
        dependency: String,
    },

    /// An enabled feature requires a feature that is disabled.
    #[error("enabled feature '{feature}' depends on other feature '{dependency}', which is disabled")]
    DisabledDependency {
        /// The referencing feature.
        feature: String,
        /// The disabled reference.
        dependency: String,
    },

    /// The `starts_after` relation contains a cycle.
    #[error("features have cyclic starts-after dependencies: {0}")]
    Cycle(String),
}

/// Propagate enabled state along `enable_with` links until a fixed point is
/// reached.
///
/// Force-disabled features are pinned off and never re-enabled. Termination
/// is guaranteed: every sweep that changes anything strictly reduces the
/// number of mismatched pairs.
///
/// # Errors
///
/// Returns [`DependencyError::UnknownDependency`] when an `enable_with`
/// target does not exist.
pub fn enable_automatic_features(registry: &FeatureRegistry) -> Result<(), DependencyError> {
    loop {
        let mut changed = false;
        for cell in registry.iter() {
            let Some(other) = cell.descriptor().enable_with() else {
                continue;
            };
            let other_cell =
                registry
                    .lookup(other)
                    .ok_or_else(|| DependencyError::UnknownDependency {
                        feature: cell.name().to_string(),
                        dependency: other.to_string(),
                    })?;
            if cell.is_force_disabled() {
                continue;
            }
            let other_enabled = other_cell.is_enabled();
            if other_enabled != cell.is_enabled() {
                cell.set_enabled(other_enabled);
                changed = true;
            }
        }
        if !changed {
            return Ok(());
        }
    }
}

/// Verify that every enabled feature's `requires` entries exist and are
/// enabled.
///
/// # Errors
///
/// Returns [`DependencyError::UnknownDependency`] or
/// [`DependencyError::DisabledDependency`] naming the offending pair.
pub fn check_requirements(registry: &FeatureRegistry) -> Result<(), DependencyError> {
    for cell in registry.iter().filter(|cell| cell.is_enabled()) {
        for dependency in cell.descriptor().requires() {
            match registry.lookup(dependency) {
                None => {
                    return Err(DependencyError::UnknownDependency {
                        feature: cell.name().to_string(),
                        dependency: dependency.clone(),
                    });
                }
                Some(other) if !other.is_enabled() => {
                    return Err(DependencyError::DisabledDependency {
                        feature: cell.name().to_string(),
                        dependency: dependency.clone(),
                    });
                }
                Some(_) => {}
            }
        }
    }
    Ok(())
}

/// Compute the ordered list of enabled features.
///
/// All registered features take part in the placement so that the order is
/// independent of enable/disable state; disabled features are removed at the
/// end. The placement is a topological sort of the `starts_after` relation
/// with ties broken by registry iteration order, so unrelated features keep
/// their registry order. References to unregistered names do not constrain
/// the order.
///
/// # Errors
///
/// Returns [`DependencyError::Cycle`] naming the features on a
/// `starts_after` cycle.
pub fn linearize(registry: &FeatureRegistry) -> Result<Vec<Arc<FeatureCell>>, DependencyError> {
    let cells: Vec<&Arc<FeatureCell>> = registry.iter().collect();
    let index: BTreeMap<&str, usize> = cells
        .iter()
        .enumerate()
        .map(|(position, cell)| (cell.name(), position))
        .collect();

    // pending[f] counts the not-yet-placed features f must start after
    let mut pending = vec![0_usize; cells.len()];
    let mut followers: Vec<Vec<usize>> = vec![Vec::new(); cells.len()];
    for (position, cell) in cells.iter().enumerate() {
        for predecessor in cell.descriptor().starts_after() {
            if let Some(&predecessor_position) = index.get(predecessor.as_str()) {
                pending[position] += 1;
                followers[predecessor_position].push(position);
            }
        }
    }

    let mut placed = vec![false; cells.len()];
    let mut ordered = Vec::with_capacity(cells.len());
    for _ in 0..cells.len() {
        let Some(next) = (0..cells.len()).find(|&candidate| !placed[candidate] && pending[candidate] == 0)
        else {
            let cycle: Vec<String> = cells
                .iter()
                .enumerate()
                .filter(|(position, _)| !placed[*position])
                .map(|(_, cell)| format!("'{}'", cell.name()))
                .collect();
            return Err(DependencyError::Cycle(cycle.join(", ")));
        };
        placed[next] = true;
        for &follower in &followers[next] {
            pending[follower] -= 1;
        }
        ordered.push(Arc::clone(cells[next]));
    }

    trace!("ordered features:");
    for cell in &ordered {
        trace!(
            feature = %cell.name(),
            enabled = cell.is_enabled(),
            starts_after = ?cell.descriptor().starts_after(),
        );
    }

    ordered.retain(|cell| cell.is_enabled());
    Ok(ordered)
}

/// Render the `starts_after` relation as a `dot` digraph.
///
/// One edge per declared entry, disabled features included, suitable for
/// graph-drawing tools.
#[must_use]
pub fn render_graph(registry: &FeatureRegistry) -> String {
    let mut out = String::from("digraph dependencies\n{\n  overlap = false;\n");
    for cell in registry.iter() {
        for predecessor in cell.descriptor().starts_after() {
            out.push_str(&format!("  {} -> {};\n", cell.name(), predecessor));
        }
    }
    out.push_str("}\n");
    out
}
