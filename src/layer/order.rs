use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::foundation::error::{SupercutError, SupercutResult};
use crate::layer::model::{LayerConfig, LayerId};

/// One entry of a user-supplied paint order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerOverride {
    /// Layer name as written by the user; parsed during resolution.
    pub id: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl LayerOverride {
    pub fn new(id: impl Into<String>, enabled: bool) -> Self {
        Self {
            id: id.into(),
            enabled,
        }
    }
}

/// An active layer with its final paint position (`0` is the background).
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedLayer {
    pub paint_index: usize,
    pub config: LayerConfig,
}

impl ResolvedLayer {
    pub fn id(&self) -> LayerId {
        self.config.id
    }
}

/// Resolve the active layers in paint order.
///
/// Without an override the configured order is used and each layer's own `enabled` flag
/// decides. With an override only the listed layers with `enabled = true` are active, in the
/// listed order. The background is always active and always painted first.
#[tracing::instrument(skip_all, fields(configured = layers.len()))]
pub fn resolve(
    layers: &[LayerConfig],
    overrides: Option<&[LayerOverride]>,
) -> SupercutResult<Vec<ResolvedLayer>> {
    let by_id: BTreeMap<LayerId, &LayerConfig> = layers.iter().map(|l| (l.id, l)).collect();
    let background = by_id
        .get(&LayerId::Background)
        .copied()
        .ok_or_else(|| SupercutError::validation("no 'background' layer configured"))?;

    let mut ordered: Vec<&LayerConfig> = vec![background];
    match overrides {
        None => {
            let mut rest: Vec<&LayerConfig> = layers
                .iter()
                .filter(|l| l.id != LayerId::Background && l.enabled)
                .collect();
            rest.sort_by_key(|l| l.order_index);
            ordered.extend(rest);
        }
        Some(entries) => {
            let mut seen = BTreeSet::new();
            for (pos, entry) in entries.iter().enumerate() {
                let id: LayerId = entry.id.parse()?;
                if !seen.insert(id) {
                    return Err(SupercutError::validation(format!(
                        "layer order lists '{id}' more than once"
                    )));
                }
                if id == LayerId::Background {
                    if pos != 0 {
                        return Err(SupercutError::validation(format!(
                            "'background' must be first in the layer order (found at position {pos})"
                        )));
                    }
                    continue;
                }
                let cfg = by_id.get(&id).copied().ok_or_else(|| {
                    SupercutError::validation(format!(
                        "layer order names '{id}', which the template does not configure"
                    ))
                })?;
                if entry.enabled {
                    ordered.push(cfg);
                }
            }
        }
    }

    let mut out = Vec::with_capacity(ordered.len());
    for (paint_index, cfg) in ordered.into_iter().enumerate() {
        if cfg.id.requires_source() && cfg.source.is_none() {
            return Err(SupercutError::validation(format!(
                "layer '{}' is active but has no source image",
                cfg.id
            )));
        }
        out.push(ResolvedLayer {
            paint_index,
            config: cfg.clone(),
        });
    }
    Ok(out)
}
