//! Stage selection.

use super::stage::{Stage, StageId, MASTER_STAGES};
use crate::error::BuildError;
use crate::options::BuildOptions;

/// Ordered stages selected for one set of options.
#[derive(Debug, Clone)]
pub struct Pipeline {
    stages: Vec<&'static Stage>,
}

impl Pipeline {
    /// Select, in master order, every stage whose predicate holds.
    ///
    /// Fails only when the options themselves are invalid.
    pub fn build(options: &BuildOptions) -> Result<Pipeline, BuildError> {
        options.validate()?;
        let stages = MASTER_STAGES
            .iter()
            .filter(|stage| (stage.applies)(options))
            .collect();
        Ok(Pipeline { stages })
    }

    pub fn stages(&self) -> &[&'static Stage] {
        &self.stages
    }

    pub fn ids(&self) -> Vec<StageId> {
        self.stages.iter().map(|s| s.id).collect()
    }

    pub fn contains(&self, id: StageId) -> bool {
        self.stages.iter().any(|s| s.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::options::fixtures::{container_options, iso_options};
    use crate::options::OutputFormat::{self, *};
    use StageId::*;

    fn ids_iso(formats: &[OutputFormat]) -> Vec<StageId> {
        Pipeline::build(&iso_options("/tmp/s".into(), formats))
            .unwrap()
            .ids()
    }

    fn ids_container(formats: &[OutputFormat]) -> Vec<StageId> {
        Pipeline::build(&container_options("/tmp/s".into(), formats))
            .unwrap()
            .ids()
    }

    #[test]
    fn iso_raw_selects_squashfs_path() {
        assert_eq!(
            ids_iso(&[Raw]),
            vec![DownloadSquashfs, ExtractSquashfs, GenRawDisk]
        );
    }

    #[test]
    fn container_gce_selects_dump_and_converter() {
        assert_eq!(ids_container(&[Gce]), vec![DumpSource, GenRawDisk, ConvertGce]);
    }

    #[test]
    fn mbr_replaces_generic_disk_stage() {
        assert_eq!(ids_container(&[MbrRaw]), vec![DumpSource, GenRawMbrDisk]);
        assert_eq!(
            ids_iso(&[MbrRaw]),
            vec![DownloadSquashfs, ExtractSquashfs, GenRawMbrDisk]
        );
    }

    #[test]
    fn source_branches_are_exclusive() {
        let singles = [[Raw], [Gce], [Vhd]];
        for formats in singles {
            let iso = ids_iso(&formats);
            assert!(iso.contains(&ExtractSquashfs));
            assert!(!iso.contains(&DumpSource));

            let container = ids_container(&formats);
            assert!(container.contains(&DumpSource));
            assert!(!container.contains(&DownloadSquashfs));
            assert!(!container.contains(&ExtractSquashfs));
        }
    }

    #[test]
    fn shared_disk_stage_appears_once() {
        let ids = ids_container(&[Raw, Gce, Vhd]);
        assert_eq!(ids.iter().filter(|id| **id == GenRawDisk).count(), 1);
        assert!(!ids.contains(&GenRawMbrDisk));
        assert_eq!(
            ids,
            vec![DumpSource, GenRawDisk, ConvertGce, ConvertVhd]
        );
    }

    #[test]
    fn mbr_with_converters_keeps_single_disk_stage() {
        let ids = ids_iso(&[MbrRaw, Vhd]);
        assert!(ids.contains(&GenRawMbrDisk));
        assert!(!ids.contains(&GenRawDisk));
        assert_eq!(ids.last(), Some(&ConvertVhd));
    }

    #[test]
    fn arm_stage_only_when_requested() {
        for formats in [&[Raw][..], &[Gce, Vhd][..], &[MbrRaw][..]] {
            assert!(!ids_iso(formats).contains(&BuildArmImage));
        }
        let mut opts = container_options("/tmp/s".into(), &[Arm]);
        opts.arm.builder = Some("/usr/bin/build-arm".into());
        let ids = Pipeline::build(&opts).unwrap().ids();
        assert_eq!(ids, vec![DumpSource, BuildArmImage]);
    }

    #[test]
    fn selection_is_deterministic() {
        let opts = iso_options("/tmp/s".into(), &[Raw, Gce, Vhd]);
        let first = Pipeline::build(&opts).unwrap().ids();
        let second = Pipeline::build(&opts).unwrap().ids();
        assert_eq!(first, second);
    }

    #[test]
    fn stages_follow_master_order() {
        let ids = ids_iso(&[Vhd, Gce, Raw]);
        let positions: Vec<usize> = ids
            .iter()
            .map(|id| MASTER_STAGES.iter().position(|s| s.id == *id).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn invalid_options_fail_before_selection() {
        let err = Pipeline::build(&iso_options("/tmp/s".into(), &[])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}
