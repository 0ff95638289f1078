mod common;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use common::{VoxelEngine, read_volume, write_volume};
use nidm_ibma::domain::{StudyId, ToolchainKind};
use nidm_ibma::engine::Operation;
use nidm_ibma::error::MetaError;
use nidm_ibma::normalize::{Normalizer, StudyContext};
use nidm_ibma::provenance::ProvenanceRecord;

struct Layout {
    _temp: tempfile::TempDir,
    study_dir: Utf8PathBuf,
    work_dir: Utf8PathBuf,
}

fn layout() -> Layout {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let study_dir = root.join("studies").join("s1");
    let work_dir = root.join("work");
    std::fs::create_dir_all(&work_dir).unwrap();
    write_volume(&study_dir.join("Contrast.nii.gz"), &[50.0, 150.0]);
    write_volume(&study_dir.join("ContrastStandardError.nii.gz"), &[5.0, 15.0]);
    write_volume(&study_dir.join("Mask.nii.gz"), &[1.0, 0.0]);
    Layout {
        _temp: temp,
        study_dir,
        work_dir,
    }
}

fn record(mask: &str, toolchain: &str) -> ProvenanceRecord {
    ProvenanceRecord {
        contrast_name: "pain".to_string(),
        effect_location: "Contrast.nii.gz".to_string(),
        stderr_location: "ContrastStandardError.nii.gz".to_string(),
        mask_location: mask.to_string(),
        toolchain_id: toolchain.to_string(),
    }
}

fn normalizer() -> Normalizer {
    Normalizer::new(Some(Utf8PathBuf::from("/opt/fsl/data/standard/MNI152_T1_2mm")), 100.0)
}

#[test]
fn spm_maps_are_resliced_onto_the_template() {
    let layout = layout();
    let engine = VoxelEngine::new();
    let study: StudyId = "s1".parse().unwrap();
    let record = record("Mask.nii.gz", nidm_ibma::domain::SPM_TOOLCHAIN);

    let triple = normalizer()
        .harmonize(
            &engine,
            &ToolchainKind::Spm,
            &record,
            StudyContext {
                id: &study,
                study_dir: &layout.study_dir,
                work_dir: &layout.work_dir,
            },
        )
        .unwrap();

    assert_eq!(triple.effect, layout.work_dir.join("s1_Contrast_r"));
    assert_eq!(triple.stderr, layout.work_dir.join("s1_ContrastStandardError_r"));
    assert_eq!(triple.mask, layout.work_dir.join("s1_Mask_r"));
    for path in [&triple.effect, &triple.stderr, &triple.mask] {
        assert!(path.exists());
    }
    let operations = engine.operations();
    assert_eq!(operations.len(), 3);
    assert!(operations.iter().all(|op| matches!(
        op,
        Operation::Reslice { reference, .. } if reference.ends_with("MNI152_T1_2mm")
    )));
}

#[test]
fn fsl_maps_are_rescaled_and_mask_is_kept() {
    let layout = layout();
    let engine = VoxelEngine::new();
    let study: StudyId = "s1".parse().unwrap();
    let record = record("file://./Mask.nii.gz", nidm_ibma::domain::FSL_TOOLCHAIN);

    let triple = normalizer()
        .harmonize(
            &engine,
            &ToolchainKind::Fsl,
            &record,
            StudyContext {
                id: &study,
                study_dir: &layout.study_dir,
                work_dir: &layout.work_dir,
            },
        )
        .unwrap();

    assert_eq!(read_volume(&triple.effect), vec![0.5, 1.5]);
    assert_eq!(read_volume(&triple.stderr), vec![0.05, 0.15]);
    assert_eq!(triple.mask, layout.study_dir.join("Mask.nii.gz"));
    assert!(triple.mask.exists());
    assert_eq!(engine.operations().len(), 2);
}

#[test]
fn unrecognized_toolchain_produces_nothing() {
    let layout = layout();
    let engine = VoxelEngine::new();
    let study: StudyId = "s1".parse().unwrap();
    let record = record("Mask.nii.gz", "http://example.org/afni");
    let kind = ToolchainKind::classify(&record.toolchain_id);

    let err = normalizer()
        .harmonize(
            &engine,
            &kind,
            &record,
            StudyContext {
                id: &study,
                study_dir: &layout.study_dir,
                work_dir: &layout.work_dir,
            },
        )
        .unwrap_err();

    assert_matches!(err, MetaError::UnrecognizedToolchain { toolchain } if toolchain == "http://example.org/afni");
    assert!(engine.operations().is_empty());
    assert_eq!(std::fs::read_dir(&layout.work_dir).unwrap().count(), 0);
}

#[test]
fn spm_without_template_fails_before_reslicing() {
    let layout = layout();
    let engine = VoxelEngine::new();
    let study: StudyId = "s1".parse().unwrap();
    let record = record("Mask.nii.gz", nidm_ibma::domain::SPM_TOOLCHAIN);

    let err = Normalizer::new(None, 100.0)
        .harmonize(
            &engine,
            &ToolchainKind::Spm,
            &record,
            StudyContext {
                id: &study,
                study_dir: &layout.study_dir,
                work_dir: &layout.work_dir,
            },
        )
        .unwrap_err();

    assert_matches!(err, MetaError::MissingTemplate);
    assert!(engine.operations().is_empty());
}
