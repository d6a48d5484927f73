//! End-to-end scenarios through the `Project` surface: stroke → composite →
//! undo/redo, selection-masked painting, and native-format round trips.

use image::Rgba;

use rasterly::buffer::TRANSPARENT;
use rasterly::canvas::Layer;
use rasterly::{CanvasState, Project, SaveFormat, SelectionShape, TiffCompression};

const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
const BLUE: Rgba<u8> = Rgba([0, 0, 255, 255]);

/// Project over a 64×64 document holding one fully transparent layer.
fn transparent_project() -> Project {
    let mut project = Project::new_untitled(1, 64, 64);
    let layer = Layer::new("Layer".into(), 64, 64, TRANSPARENT);
    project.canvas = CanvasState::from_parts(64, 64, vec![layer], Some(0));
    project.tools.settings.primary_color = RED;
    project.tools.settings.size = 4.0;
    project.tools.settings.hardness = 1.0;
    project
}

fn temp_path(ext: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("rasterly-doc-test-{}.{}", uuid::Uuid::new_v4(), ext))
}

#[test]
fn brush_stroke_composites_and_undoes() {
    let mut project = transparent_project();

    project.pointer_pressed(10.0, 10.0, None);
    project.pointer_dragged(20.0, 10.0, None);
    project.pointer_released(20.0, 10.0, None);

    let out = project.composite();
    for x in 10..=20 {
        assert_eq!(out.get(x, 10).unwrap(), RED, "stroke pixel at x={}", x);
    }
    // Pixels away from the stroke footprint stayed untouched.
    assert_eq!(out.get(15, 15).unwrap(), TRANSPARENT);
    assert_eq!(out.get(40, 40).unwrap(), TRANSPARENT);

    assert!(project.undo().is_some());
    assert!(project.composite().is_fully_transparent());

    assert!(project.redo().is_some());
    assert_eq!(project.composite().get(15, 10).unwrap(), RED);
}

#[test]
fn n_undos_restore_the_pre_sequence_composite_exactly() {
    let mut project = transparent_project();
    let before = project.composite();

    // Four recorded actions of three different kinds.
    project.pointer_pressed(5.0, 5.0, None);
    project.pointer_released(5.0, 5.0, None);
    let top = project.add_layer("Ink");
    project.pointer_pressed(30.0, 30.0, None);
    project.pointer_dragged(40.0, 30.0, None);
    project.pointer_released(40.0, 30.0, None);
    project.set_layer_opacity(top, 0.5).unwrap();
    assert_eq!(project.history.undo_count(), 4);

    let after = project.composite();
    assert_ne!(before, after);

    for _ in 0..4 {
        assert!(project.undo().is_some());
    }
    assert!(project.undo().is_none());
    assert_eq!(project.composite(), before);

    for _ in 0..4 {
        assert!(project.redo().is_some());
    }
    assert!(project.redo().is_none());
    assert_eq!(project.composite(), after);
}

#[test]
fn recording_discards_the_redo_branch() {
    let mut project = transparent_project();
    project.pointer_pressed(5.0, 5.0, None);
    project.pointer_released(5.0, 5.0, None);
    project.pointer_pressed(15.0, 5.0, None);
    project.pointer_released(15.0, 5.0, None);

    assert!(project.undo().is_some());
    assert!(project.can_redo());

    // A new recorded action prunes the undone branch.
    project.pointer_pressed(25.0, 5.0, None);
    project.pointer_released(25.0, 5.0, None);
    assert!(!project.can_redo());
    assert!(project.redo().is_none());
}

#[test]
fn half_opacity_red_over_opaque_blue() {
    let mut project = Project::new_untitled(1, 16, 16);
    let bottom = Layer::new("blue".into(), 16, 16, BLUE);
    let mut top = Layer::new("red".into(), 16, 16, RED);
    top.set_opacity(0.5).unwrap();
    project.canvas = CanvasState::from_parts(16, 16, vec![bottom, top], Some(1));

    let out = project.composite();
    for (x, y) in [(0, 0), (8, 8), (15, 15)] {
        assert_eq!(out.get(x, y).unwrap(), Rgba([128, 0, 128, 255]));
    }
}

#[test]
fn selection_confines_painting_to_its_bounds() {
    let mut project = transparent_project();
    project.set_selection(SelectionShape::Rectangle { min_x: 8, min_y: 8, max_x: 24, max_y: 24 });
    project.tools.settings.size = 10.0;

    // Stroke along the selection's right edge; half the footprint is outside.
    project.pointer_pressed(24.0, 8.0, None);
    project.pointer_dragged(24.0, 24.0, None);
    project.pointer_released(24.0, 24.0, None);

    let layer = &project.canvas.layers[0].pixels;
    for y in 0..64 {
        for x in 0..64 {
            let inside = (8..=24).contains(&x) && (8..=24).contains(&y);
            if !inside {
                assert_eq!(
                    layer.get(x, y).unwrap(),
                    TRANSPARENT,
                    "pixel ({}, {}) outside the selection was painted",
                    x,
                    y
                );
            }
        }
    }
    // And the stroke did land inside.
    assert_eq!(layer.get(23, 16).unwrap(), RED);
}

#[test]
fn switching_tools_mid_stroke_finalizes_the_action() {
    let mut project = transparent_project();
    project.pointer_pressed(10.0, 10.0, None);
    project.pointer_dragged(20.0, 10.0, None);
    // No release — the tool switch forces one.
    project.select_tool("eraser").unwrap();

    assert_eq!(project.history.undo_count(), 1);
    assert_eq!(project.composite().get(15, 10).unwrap(), RED);
    assert!(project.undo().is_some());
    assert!(project.composite().is_fully_transparent());
}

#[test]
fn eraser_then_undo_restores_pixels() {
    let mut project = transparent_project();
    project.pointer_pressed(10.0, 10.0, None);
    project.pointer_dragged(30.0, 10.0, None);
    project.pointer_released(30.0, 10.0, None);

    project.select_tool("eraser").unwrap();
    project.tools.settings.size = 8.0;
    project.pointer_pressed(20.0, 10.0, None);
    project.pointer_released(20.0, 10.0, None);
    assert_eq!(project.composite().get(20, 10).unwrap(), TRANSPARENT);
    assert_eq!(project.composite().get(10, 10).unwrap(), RED);

    project.undo();
    assert_eq!(project.composite().get(20, 10).unwrap(), RED);
}

#[test]
fn native_round_trip_through_project_files() {
    let mut project = transparent_project();
    project.pointer_pressed(10.0, 10.0, None);
    project.pointer_dragged(20.0, 10.0, None);
    project.pointer_released(20.0, 10.0, None);
    let i = project.add_layer("Notes");
    project.set_layer_opacity(i, 0.25).unwrap();
    let composite = project.composite();

    let path = temp_path("rly");
    project.save_as(path.clone()).unwrap();
    assert!(!project.is_dirty);

    let reloaded = Project::from_file(path.clone()).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(reloaded.canvas.layer_count(), 2);
    assert_eq!(reloaded.canvas.layers[1].name(), "Notes");
    assert_eq!(reloaded.canvas.layers[1].opacity(), 0.25);
    assert_eq!(reloaded.composite(), composite);
    // A fresh load starts with clean history.
    assert!(!reloaded.can_undo());
}

#[test]
fn png_export_flattens_the_stack() {
    let mut project = Project::new_untitled(1, 8, 8);
    let bottom = Layer::new("blue".into(), 8, 8, BLUE);
    let mut top = Layer::new("red".into(), 8, 8, RED);
    top.set_opacity(0.5).unwrap();
    project.canvas = CanvasState::from_parts(8, 8, vec![bottom, top], Some(1));

    let path = temp_path("png");
    project.export(&path, SaveFormat::Png, 90, TiffCompression::None).unwrap();

    let flat = Project::from_file(path.clone()).unwrap();
    std::fs::remove_file(&path).ok();
    assert_eq!(flat.canvas.layer_count(), 1);
    assert_eq!(flat.canvas.layers[0].pixels.get(4, 4).unwrap(), Rgba([128, 0, 128, 255]));
}

#[test]
fn pointer_input_on_empty_document_is_harmless() {
    let mut project = Project::new_untitled(1, 32, 32);
    project.canvas = CanvasState::new_empty(32, 32);

    project.pointer_pressed(5.0, 5.0, None);
    project.pointer_dragged(15.0, 5.0, None);
    project.pointer_released(15.0, 5.0, None);

    assert_eq!(project.history.undo_count(), 0);
    assert!(project.composite().is_fully_transparent());
}
