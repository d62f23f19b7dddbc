use scene_assembler::{
    BufferLedger, DiagnosticKind, ImportError, Package, PackageExtractor, Transform,
    resources::DirFetcher,
};

use crate::common::test_utils::{
    approx, cube_obj, cube_stl, forged_zip64_entry, gltf_cube_buffer, gltf_cube_json, init_logger,
    sdf_document, sdf_visual, zip_archive,
};

mod common;

fn extractor(ledger: &BufferLedger) -> PackageExtractor<DirFetcher> {
    PackageExtractor::new(DirFetcher::new("."), ledger.clone())
}

fn archive(file_name: &str, entries: &[(&str, &[u8])]) -> Package {
    Package::Bytes {
        file_name: file_name.to_string(),
        bytes: zip_archive(entries),
    }
}

fn part_names(resolved: &scene_assembler::ResolvedPackage) -> Vec<String> {
    resolved.graph.parts().into_iter().map(|p| p.name).collect()
}

#[tokio::test]
async fn traversal_entries_never_become_parts() {
    init_logger();
    let ledger = BufferLedger::new();
    let cube = cube_stl([0.0; 3], [1.0; 3]);
    let resolved = extractor(&ledger)
        .resolve(archive(
            "upload.zip",
            &[
                ("../../evil.stl", &cube),
                ("meshes/..\\..\\evil2.stl", &cube),
                ("body.stl", &cube),
            ],
        ))
        .await
        .unwrap();

    assert_eq!(part_names(&resolved), ["Body"]);
    let rejected: Vec<_> = resolved
        .diagnostics
        .iter()
        .filter(|d| d.kind == DiagnosticKind::RejectedEntry)
        .collect();
    assert_eq!(rejected.len(), 2);
    assert!(resolved.graph.parts().iter().all(|p| !p.source_file.contains("evil")));
}

#[tokio::test]
async fn traversal_entries_are_not_matched_by_visuals() {
    let ledger = BufferLedger::new();
    let cube = cube_stl([0.0; 3], [1.0; 3]);
    let sdf = sdf_document(&[("l", vec![sdf_visual("evil", "model://x/evil.stl", "0 0 0 0 0 0")])]);
    let resolved = extractor(&ledger)
        .resolve(archive("m.zip", &[("model.sdf", sdf.as_bytes()), ("../evil.stl", &cube)]))
        .await
        .unwrap();

    assert!(resolved.graph.is_empty());
    assert!(resolved.diagnostics.iter().any(|d| d.kind == DiagnosticKind::UnresolvedMesh));
    assert!(resolved.diagnostics.iter().any(|d| d.kind == DiagnosticKind::EmptyImport));
}

#[tokio::test]
async fn meshes_without_description_are_named_from_files() {
    let ledger = BufferLedger::new();
    let cube = cube_stl([0.0; 3], [1.0; 3]);
    let obj = cube_obj();
    let resolved = extractor(&ledger)
        .resolve(archive(
            "Rover_v2.zip",
            &[
                ("rover/front_left-wheel.stl", &cube),
                ("rover/base_plate.obj", obj.as_bytes()),
                ("rover/notes.txt", b"not a mesh"),
                ("__MACOSX/rover/._front_left-wheel.stl", b"junk"),
                ("rover/", b""),
            ],
        ))
        .await
        .unwrap();

    assert_eq!(resolved.name, "Rover_v2");
    assert_eq!(part_names(&resolved), ["Front Left Wheel", "Base Plate"]);
    assert_eq!(resolved.graph.parts()[1].source_file, "base_plate.obj");
    assert!(resolved.diagnostics.is_empty(), "{:?}", resolved.diagnostics);
    assert_eq!(resolved.graph.normalization(), &Transform::z_up_to_y_up());
}

#[tokio::test]
async fn description_places_parts_and_side_files_are_read() {
    let ledger = BufferLedger::new();
    let cube = cube_stl([0.0; 3], [1.0; 3]);
    let sdf = sdf_document(&[(
        "base",
        vec![
            sdf_visual("chassis", "model://rover/meshes/chassis.stl", "0 0 0 0 0 0"),
            sdf_visual("front_tire", "model://rover/wheel.stl", "2 0 0 0 0 0"),
            sdf_visual("antenna", "model://rover/meshes/antenna.stl", "0 0 0 0 0 0"),
        ],
    )]);
    let spec = br#"{ "model_name": "Mars Rover", "parts": [] }"#;
    let resolved = extractor(&ledger)
        .resolve(archive(
            "upload.zip",
            &[
                ("rover/model.sdf", sdf.as_bytes()),
                ("rover/meshes/chassis.stl", &cube),
                ("rover/meshes/wheel.stl", &cube),
                ("rover/specification.json", spec),
                ("rover/model.config", b"<model><name>rover</name></model>"),
                ("rover/model.yaml", b"mass: 12.5\nwheels: 4\n"),
                ("rover/helpers.py", b"# helper"),
                ("rover/assembly.py", b"# assembly"),
            ],
        ))
        .await
        .unwrap();

    assert_eq!(resolved.name, "Mars Rover");
    assert_eq!(part_names(&resolved), ["chassis", "front_tire"]);
    assert_eq!(resolved.graph.parts()[1].source_file, "wheel.stl");
    assert_eq!(resolved.config.as_deref(), Some("<model><name>rover</name></model>"));
    assert_eq!(resolved.source_script.as_deref(), Some("# assembly"));
    assert_eq!(resolved.physics.get("wheels"), Some(&serde_json::json!(4)));
    assert_eq!(resolved.specification.as_ref().unwrap()["parts"], serde_json::json!([]));

    let unresolved: Vec<_> = resolved
        .diagnostics
        .iter()
        .filter(|d| d.kind == DiagnosticKind::UnresolvedMesh)
        .map(|d| d.subject.as_str())
        .collect();
    assert_eq!(unresolved, ["meshes/antenna.stl"]);

    // the tire sits 2 units along +X in both frames
    let bounds = resolved.graph.bounds().unwrap();
    assert!(approx(bounds.max[0], 3.0));
}

#[tokio::test]
async fn unmatched_description_falls_back_to_all_meshes() {
    let ledger = BufferLedger::new();
    let cube = cube_stl([0.0; 3], [1.0; 3]);
    let sdf = sdf_document(&[("l", vec![sdf_visual("ghost", "model://x/ghost.stl", "0 0 0 0 0 0")])]);
    let resolved = extractor(&ledger)
        .resolve(archive("x.zip", &[("model.sdf", sdf.as_bytes()), ("arm.stl", &cube)]))
        .await
        .unwrap();

    assert_eq!(part_names(&resolved), ["Arm"]);
    assert!(resolved
        .diagnostics
        .iter()
        .any(|d| d.kind == DiagnosticKind::FallbackToDirectMeshes));
}

#[tokio::test]
async fn broken_description_falls_back_to_all_meshes() {
    let ledger = BufferLedger::new();
    let cube = cube_stl([0.0; 3], [1.0; 3]);
    let resolved = extractor(&ledger)
        .resolve(archive(
            "x.zip",
            &[("model.sdf", b"<sdf><model></sdf>"), ("arm.stl", &cube), ("leg.stl", &cube)],
        ))
        .await
        .unwrap();

    assert_eq!(part_names(&resolved), ["Arm", "Leg"]);
    assert_eq!(resolved.diagnostics[0].kind, DiagnosticKind::DescriptorInvalid);
}

#[tokio::test]
async fn raw_specification_is_kept() {
    let ledger = BufferLedger::new();
    let cube = cube_stl([0.0; 3], [1.0; 3]);
    let resolved = extractor(&ledger)
        .resolve(archive("quad.zip", &[("specification", b"four rotors"), ("a.stl", &cube)]))
        .await
        .unwrap();

    assert_eq!(resolved.name, "quad");
    assert_eq!(
        resolved.specification,
        Some(serde_json::json!({ "raw": "four rotors" }))
    );
}

#[tokio::test]
async fn undecodable_mesh_is_skipped() {
    let ledger = BufferLedger::new();
    let cube = cube_stl([0.0; 3], [1.0; 3]);
    let resolved = extractor(&ledger)
        .resolve(archive("x.zip", &[("broken.glb", b"not gltf"), ("ok.stl", &cube)]))
        .await
        .unwrap();

    assert_eq!(part_names(&resolved), ["Ok"]);
    let failed: Vec<_> = resolved
        .diagnostics
        .iter()
        .filter(|d| d.kind == DiagnosticKind::DecodeFailed)
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].subject, "broken.glb");
}

#[tokio::test]
async fn gltf_buffers_come_from_sibling_entries() {
    let ledger = BufferLedger::new();
    let gltf = gltf_cube_json("cube.bin");
    let resolved = extractor(&ledger)
        .resolve(archive(
            "x.zip",
            &[("parts/cube.gltf", gltf.as_bytes()), ("parts/cube.bin", &gltf_cube_buffer())],
        ))
        .await
        .unwrap();

    assert_eq!(part_names(&resolved), ["Cube"]);
    let metrics = scene_assembler::GeometryAnalyzer::new().analyze(&resolved.graph);
    assert!(approx(metrics.volume, 1.0));
    assert!(approx(metrics.surface_area, 6.0));
}

#[tokio::test]
async fn single_mesh_bytes() {
    let ledger = BufferLedger::new();
    let resolved = extractor(&ledger)
        .resolve(Package::Bytes {
            file_name: "main_frame.stl".to_string(),
            bytes: cube_stl([0.0; 3], [2.0; 3]),
        })
        .await
        .unwrap();

    assert_eq!(resolved.name, "Main Frame");
    assert_eq!(resolved.graph.parts()[0].material.metalness, 0.85);
    assert_eq!(ledger.live_buffers(), 1);
    let metrics = scene_assembler::GeometryAnalyzer::new().analyze(&resolved.graph);
    assert!(approx(metrics.volume, 8.0));
}

#[tokio::test]
async fn broken_single_mesh_is_fatal() {
    let ledger = BufferLedger::new();
    let result = extractor(&ledger)
        .resolve(Package::Bytes {
            file_name: "frame.stl".to_string(),
            bytes: vec![1, 2, 3],
        })
        .await;
    assert!(matches!(result, Err(ImportError::Decode { .. })));
}

#[tokio::test]
async fn unknown_package_is_rejected() {
    let ledger = BufferLedger::new();
    let result = extractor(&ledger)
        .resolve(Package::Bytes {
            file_name: "drawing.dwg".to_string(),
            bytes: vec![0; 16],
        })
        .await;
    assert!(matches!(result, Err(ImportError::UnsupportedPackage(name)) if name == "drawing.dwg"));

    let result = extractor(&ledger)
        .resolve(Package::Bytes {
            file_name: "upload.zip".to_string(),
            bytes: b"PK\x03\x04 truncated".to_vec(),
        })
        .await;
    assert!(matches!(result, Err(ImportError::Archive(_))));
}

#[tokio::test]
async fn forged_entry_size_is_an_error() {
    let ledger = BufferLedger::new();
    let result = extractor(&ledger)
        .resolve(Package::Bytes {
            file_name: "upload.zip".to_string(),
            bytes: forged_zip64_entry("notes.txt", b"hello", 1 << 62),
        })
        .await;
    assert!(matches!(result, Err(ImportError::TooLarge { ref name, .. }) if name == "notes.txt"));
}

#[tokio::test]
async fn packages_over_the_size_limit_are_rejected() {
    let ledger = BufferLedger::new();
    let small = |ledger: &BufferLedger| extractor(ledger).with_size_limit(1024);

    // one entry inflating past the limit
    let zeros = vec![0u8; 4096];
    let result = small(&ledger).resolve(archive("bomb.zip", &[("a.stl", &zeros)])).await;
    assert!(matches!(result, Err(ImportError::TooLarge { limit: 1024, .. })));

    // entries that only exceed the limit together
    let half = vec![0u8; 600];
    let result = small(&ledger)
        .resolve(archive("pair.zip", &[("a.txt", &half), ("b.txt", &half)]))
        .await;
    assert!(matches!(result, Err(ImportError::TooLarge { ref name, .. }) if name == "b.txt"));

    // an oversized upload is never decoded
    let result = small(&ledger)
        .resolve(Package::Bytes {
            file_name: "big.stl".to_string(),
            bytes: vec![0; 2048],
        })
        .await;
    assert!(matches!(result, Err(ImportError::TooLarge { ref name, .. }) if name == "big.stl"));
    assert_eq!(ledger.live_buffers(), 0);
}

#[tokio::test]
async fn description_without_visuals_builds_specified_parts() {
    let ledger = BufferLedger::new();
    let cube = cube_stl([0.0; 3], [1.0; 3]);
    let sdf = sdf_document(&[("base", vec![])]);
    let spec = br#"{
        "model_name": "Crate",
        "parts": [
            { "name": "lid", "dimensions": { "length": 2, "width": 1, "height": 0.5 },
              "placement": { "x": 0, "y": 0, "z": 1 } },
            { "name": "wheel_hub" }
        ]
    }"#;
    let resolved = extractor(&ledger)
        .resolve(archive(
            "crate.zip",
            &[("model.sdf", sdf.as_bytes()), ("specification.json", spec), ("stray.stl", &cube)],
        ))
        .await
        .unwrap();

    assert_eq!(resolved.name, "Crate");
    assert_eq!(part_names(&resolved), ["lid", "wheel_hub"]);
    assert_eq!(resolved.graph.parts()[0].source_file, "specification.json");
    assert!(resolved.diagnostics.is_empty(), "{:?}", resolved.diagnostics);

    let metrics = scene_assembler::GeometryAnalyzer::new().analyze(&resolved.graph);
    assert!(approx(metrics.volume, 1.001), "volume {}", metrics.volume);
    // the lid's top face ends up 1.25 above the origin once Z is up-converted
    let bounds = resolved.graph.bounds().unwrap();
    assert!(approx(bounds.max[1], 1.25));
}
