//! Merging per-stage reflection into one pipeline layout
//!
//! Resources are unioned by name. Two stages are expected to agree on where a
//! name lives; when they do not, the later stage wins and a diagnostic is
//! returned alongside the layout. Bind group layout entries are emitted with
//! every optional field filled in, so identical layouts hash identically.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::reflection::{BufferBindingInfo, ReflectionInfo, ResourceKind};

/// One binding of a merged layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutBinding {
    pub name: String,
    pub binding: u32,
    pub kind: ResourceKind,
    pub visibility: wgpu::ShaderStages,
    pub layout: Option<Arc<BufferBindingInfo>>,
}

impl LayoutBinding {
    #[must_use]
    pub fn to_wgpu(&self) -> wgpu::BindGroupLayoutEntry {
        wgpu::BindGroupLayoutEntry {
            binding: self.binding,
            visibility: self.visibility,
            ty: self.kind.binding_type(),
            count: None,
        }
    }
}

/// Bindings of one group, sorted by binding index.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BindGroupLayoutDescriptor {
    pub entries: Vec<LayoutBinding>,
}

impl BindGroupLayoutDescriptor {
    /// `wgpu` entries in binding order; also the cache key of the layout.
    #[must_use]
    pub fn wgpu_entries(&self) -> Vec<wgpu::BindGroupLayoutEntry> {
        self.entries.iter().map(LayoutBinding::to_wgpu).collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Ordered per-group layouts of a pipeline, plus merge diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PipelineLayoutDescriptor {
    /// Index `i` describes `@group(i)`. Gaps are empty groups.
    pub groups: Vec<BindGroupLayoutDescriptor>,
    /// Conflicts found while merging. Never fatal.
    pub diagnostics: Vec<String>,
}

impl PipelineLayoutDescriptor {
    #[must_use]
    pub fn binding(&self, name: &str) -> Option<(u32, &LayoutBinding)> {
        self.groups.iter().enumerate().find_map(|(group, layout)| {
            layout
                .entries
                .iter()
                .find(|e| e.name == name)
                .map(|e| (group as u32, e))
        })
    }
}

#[derive(Clone)]
struct Merged {
    group: u32,
    binding: LayoutBinding,
}

/// Unions the resources of every stage into one pipeline layout.
///
/// Stages are given in pipeline order (vertex, then fragment); a later stage
/// wins conflicts. Passing the same reflection twice (one module serving
/// both stages) is harmless.
#[must_use]
pub fn merge_stages_layout(stages: &[&ReflectionInfo]) -> PipelineLayoutDescriptor {
    let mut diagnostics = Vec::new();
    let mut order: Vec<String> = Vec::new();
    let mut by_name: FxHashMap<String, Merged> = FxHashMap::default();

    for (stage_index, info) in stages.iter().enumerate() {
        if stages[..stage_index].iter().any(|earlier| std::ptr::eq(*earlier, *info)) {
            continue;
        }
        for resource in &info.resources {
            let incoming = Merged {
                group: resource.group,
                binding: LayoutBinding {
                    name: resource.name.clone(),
                    binding: resource.binding,
                    kind: resource.kind.clone(),
                    visibility: resource.kind.visibility(),
                    layout: resource.layout.clone(),
                },
            };
            match by_name.get_mut(&resource.name) {
                Some(existing) => {
                    let same_slot = existing.group == incoming.group
                        && existing.binding.binding == incoming.binding.binding
                        && existing.binding.kind.category() == incoming.binding.kind.category();
                    if same_slot {
                        let visibility = existing.binding.visibility | incoming.binding.visibility;
                        *existing = incoming;
                        existing.binding.visibility = visibility;
                    } else {
                        let message = format!(
                            "resource `{}` declared at (group {}, binding {}, {:?}) and at (group {}, binding {}, {:?}); using the latter",
                            resource.name,
                            existing.group,
                            existing.binding.binding,
                            existing.binding.kind.category(),
                            incoming.group,
                            incoming.binding.binding,
                            incoming.binding.kind.category(),
                        );
                        log::warn!("{message}");
                        diagnostics.push(message);
                        *existing = incoming;
                    }
                }
                None => {
                    order.push(resource.name.clone());
                    by_name.insert(resource.name.clone(), incoming);
                }
            }
        }
    }

    let mut groups: Vec<BindGroupLayoutDescriptor> = Vec::new();
    for name in &order {
        let Some(merged) = by_name.get(name) else {
            continue;
        };
        let group = merged.group as usize;
        if groups.len() <= group {
            groups.resize_with(group + 1, BindGroupLayoutDescriptor::default);
        }
        let entries = &mut groups[group].entries;
        if let Some(clash) = entries.iter().position(|e| e.binding == merged.binding.binding) {
            let message = format!(
                "resources `{}` and `{}` share (group {}, binding {}); using `{}`",
                entries[clash].name, name, merged.group, merged.binding.binding, name
            );
            log::warn!("{message}");
            diagnostics.push(message);
            entries.remove(clash);
        }
        entries.push(merged.binding.clone());
    }

    for group in &mut groups {
        group.entries.sort_by_key(|e| e.binding);
    }

    PipelineLayoutDescriptor { groups, diagnostics }
}
