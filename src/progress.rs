//! Overall run progress as a pure function of where the run is.
//!
//! 0-20 locale config for every target, 20-30 extras bundle, 30-90 catalog
//! work split evenly across targets, 90-100 finalization.

const CONFIG_END: f32 = 20.0;
const EXTRAS_END: f32 = 30.0;
const CATALOG_END: f32 = 90.0;
const DONE: f32 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ConfigWrite,
    ExtrasInstall,
    CatalogAcquire,
    CatalogMerge,
    CatalogPlace,
    ManifestWrite,
    Finished,
}

impl Stage {
    pub fn label(self) -> &'static str {
        match self {
            Stage::ConfigWrite => "writing locale config",
            Stage::ExtrasInstall => "installing extras",
            Stage::CatalogAcquire => "fetching catalog",
            Stage::CatalogMerge => "applying overlays",
            Stage::CatalogPlace => "placing catalog",
            Stage::ManifestWrite => "recording manifest",
            Stage::Finished => "done",
        }
    }
}

/// Percentage (0-100) reached once `stage` has handled `processed` of
/// `total` items for target `target_index` of `target_count`.
pub fn fraction(
    stage: Stage,
    target_index: usize,
    target_count: usize,
    processed: usize,
    total: usize,
) -> f32 {
    let count = target_count.max(1) as f32;
    let index = target_index.min(target_count.max(1) - 1) as f32;
    let done = if total == 0 {
        1.0
    } else {
        processed.min(total) as f32 / total as f32
    };
    let slice = (CATALOG_END - EXTRAS_END) / count;

    match stage {
        Stage::ConfigWrite => CONFIG_END * (index + 1.0) / count,
        Stage::ExtrasInstall => CONFIG_END + (EXTRAS_END - CONFIG_END) * (index + 1.0) / count,
        Stage::CatalogAcquire => EXTRAS_END + slice * index,
        Stage::CatalogMerge => EXTRAS_END + slice * (index + done),
        Stage::CatalogPlace | Stage::ManifestWrite => EXTRAS_END + slice * (index + 1.0),
        Stage::Finished => DONE,
    }
}

/// Receives progress and status text from a running install.
pub trait ProgressSink {
    fn progress(&self, percent: f32);
    fn status(&self, text: String);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partitions_match_stage_boundaries() {
        assert_eq!(fraction(Stage::ConfigWrite, 1, 2, 0, 0), 20.0);
        assert_eq!(fraction(Stage::ExtrasInstall, 0, 1, 0, 0), 30.0);
        assert_eq!(fraction(Stage::CatalogAcquire, 0, 2, 0, 0), 30.0);
        assert_eq!(fraction(Stage::CatalogAcquire, 1, 2, 0, 0), 60.0);
        assert_eq!(fraction(Stage::ManifestWrite, 1, 2, 0, 0), 90.0);
        assert_eq!(fraction(Stage::Finished, 0, 2, 0, 0), 100.0);
    }

    #[test]
    fn merge_is_prorated_inside_the_target_slice() {
        assert_eq!(fraction(Stage::CatalogMerge, 0, 2, 1, 2), 45.0);
        assert_eq!(fraction(Stage::CatalogMerge, 1, 2, 3, 4), 82.5);
        assert_eq!(fraction(Stage::CatalogMerge, 0, 1, 0, 0), 90.0);
    }

    #[test]
    fn out_of_range_inputs_stay_inside_bounds() {
        assert_eq!(fraction(Stage::CatalogMerge, 5, 2, 9, 3), 90.0);
        assert_eq!(fraction(Stage::ConfigWrite, 0, 0, 0, 0), 20.0);
    }
}
