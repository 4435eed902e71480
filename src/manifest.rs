use serde::{Deserialize, Serialize};

/// Which kind of dataset a batch belongs to.
///
/// `Lora` batches are partitioned into shot categories with fixed ratios;
/// `Product` and `Ugc` batches are flat runs of a single category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Lora,
    Product,
    Ugc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShotKind {
    #[serde(rename = "HEADSHOT")]
    Headshot,
    #[serde(rename = "HALF BODY")]
    HalfBody,
    #[serde(rename = "3/4 BODY")]
    ThreeQuarterBody,
    #[serde(rename = "FULL BODY")]
    FullBody,
    #[serde(rename = "PRODUCT AD")]
    ProductAd,
    #[serde(rename = "UGC LIFESTYLE")]
    UgcLifestyle,
}

impl ShotKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShotKind::Headshot => "HEADSHOT",
            ShotKind::HalfBody => "HALF BODY",
            ShotKind::ThreeQuarterBody => "3/4 BODY",
            ShotKind::FullBody => "FULL BODY",
            ShotKind::ProductAd => "PRODUCT AD",
            ShotKind::UgcLifestyle => "UGC LIFESTYLE",
        }
    }
}

/// Category/position metadata attached to a slot and later carried on the
/// reconciled prompt item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationMeta {
    #[serde(rename = "type")]
    pub shot: ShotKind,
    /// 1-based rank within the category.
    pub index: usize,
    /// Size of the category across the whole dataset run.
    pub total: usize,
    pub label: String,
}

/// One planned unit of output within a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestSlot {
    /// Position within the current batch, 0-based.
    pub sequence_index: usize,
    /// Position within the full dataset run, 0-based.
    pub absolute_index: usize,
    pub meta: GenerationMeta,
}

/// The canonical headshot angles every identity dataset must cover. Applied
/// to absolute indices 0..7 whenever those fall in the headshot category,
/// independent of how the run is chunked into batches.
pub const MANDATORY_POSE_SEQUENCE: [&str; 7] = [
    "Left 1/4 View",
    "Front View",
    "Right 1/4 View",
    "Left Profile",
    "Right Profile",
    "Look Up",
    "Look Down",
];

const HEADSHOT_RATIO: f64 = 0.35;
const HALF_BODY_RATIO: f64 = 0.30;
const THREE_QUARTER_RATIO: f64 = 0.20;

/// Cumulative category limits for an identity dataset of `total_target`
/// slots. An absolute index belongs to the first category whose limit
/// exceeds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategoryBoundaries {
    pub headshot_limit: usize,
    pub half_body_limit: usize,
    pub three_quarter_limit: usize,
    pub total_target: usize,
}

impl CategoryBoundaries {
    pub fn compute(total_target: usize) -> Self {
        let headshot = ((total_target as f64 * HEADSHOT_RATIO).floor() as usize).max(1);
        let half_body = ((total_target as f64 * HALF_BODY_RATIO).floor() as usize).max(1);
        let three_quarter = ((total_target as f64 * THREE_QUARTER_RATIO).floor() as usize).max(1);
        Self {
            headshot_limit: headshot,
            half_body_limit: headshot + half_body,
            three_quarter_limit: headshot + half_body + three_quarter,
            total_target,
        }
    }

    pub fn headshot_total(&self) -> usize {
        self.headshot_limit
    }

    pub fn half_body_total(&self) -> usize {
        self.half_body_limit - self.headshot_limit
    }

    pub fn three_quarter_total(&self) -> usize {
        self.three_quarter_limit - self.half_body_limit
    }

    /// Remainder category. Saturates to zero for very small targets where
    /// the per-category minimums already cover the run.
    pub fn full_body_total(&self) -> usize {
        self.total_target.saturating_sub(self.three_quarter_limit)
    }

    fn meta_for(&self, absolute_index: usize) -> GenerationMeta {
        if absolute_index < self.headshot_limit {
            let label = MANDATORY_POSE_SEQUENCE
                .get(absolute_index)
                .map(|s| s.to_string())
                .unwrap_or_else(|| "Varied Headshot".to_string());
            GenerationMeta {
                shot: ShotKind::Headshot,
                index: absolute_index + 1,
                total: self.headshot_total(),
                label,
            }
        } else if absolute_index < self.half_body_limit {
            GenerationMeta {
                shot: ShotKind::HalfBody,
                index: absolute_index - self.headshot_limit + 1,
                total: self.half_body_total(),
                label: "Waist Up / Lifestyle".to_string(),
            }
        } else if absolute_index < self.three_quarter_limit {
            GenerationMeta {
                shot: ShotKind::ThreeQuarterBody,
                index: absolute_index - self.half_body_limit + 1,
                total: self.three_quarter_total(),
                label: "Knees Up / Environmental".to_string(),
            }
        } else {
            GenerationMeta {
                shot: ShotKind::FullBody,
                index: absolute_index - self.three_quarter_limit + 1,
                total: self.full_body_total(),
                label: "Head to Toe".to_string(),
            }
        }
    }
}

/// Plans `count` slots starting at absolute position `start_count` of a
/// dataset run of `total_target` items.
///
/// Each slot recomputes its own category from its own absolute index, so a
/// batch that spans a category boundary labels every slot correctly and
/// chunking a run into batches never changes per-index labels.
pub fn generate_manifest(
    task_type: TaskType,
    total_target: usize,
    start_count: usize,
    count: usize,
) -> Vec<ManifestSlot> {
    let mut slots = Vec::with_capacity(count);

    match task_type {
        TaskType::Product => {
            for i in 0..count {
                let absolute_index = start_count + i;
                slots.push(ManifestSlot {
                    sequence_index: i,
                    absolute_index,
                    meta: GenerationMeta {
                        shot: ShotKind::ProductAd,
                        index: absolute_index + 1,
                        total: total_target,
                        label: "Optimized Ad Composition".to_string(),
                    },
                });
            }
        }
        TaskType::Ugc => {
            for i in 0..count {
                let absolute_index = start_count + i;
                slots.push(ManifestSlot {
                    sequence_index: i,
                    absolute_index,
                    meta: GenerationMeta {
                        shot: ShotKind::UgcLifestyle,
                        index: absolute_index + 1,
                        total: total_target,
                        label: "Authentic Realism".to_string(),
                    },
                });
            }
        }
        TaskType::Lora => {
            let boundaries = CategoryBoundaries::compute(total_target);
            for i in 0..count {
                let absolute_index = start_count + i;
                slots.push(ManifestSlot {
                    sequence_index: i,
                    absolute_index,
                    meta: boundaries.meta_for(absolute_index),
                });
            }
        }
    }

    slots
}
