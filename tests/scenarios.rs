//! Scenario tests seeded from the sampling-strategy engine's acceptance
//! checklist: one schematic/strategy/vendor/lifecycle path per scenario,
//! exercised directly against the library rather than over HTTP.

use wafer_sampling_engine::execution::{execute, ExecutionContext};
use wafer_sampling_engine::geometry::CoordinateSystem;
use wafer_sampling_engine::lifecycle::check_transition;
use wafer_sampling_engine::registry::bootstrap;
use wafer_sampling_engine::schematic::{self, ParseHints};
use wafer_sampling_engine::strategy::compiler::compile;
use wafer_sampling_engine::strategy::{LifecycleState, RuleConfig, StrategyDefinition, StrategyType};
use wafer_sampling_engine::vendor::asml::AsmlEmitter;
use wafer_sampling_engine::vendor::kla::KlaEmitter;
use wafer_sampling_engine::vendor::{StrategyMeta, VendorEmitter};
use wafer_sampling_engine::wafer::{Die, WaferMap};

fn svg_grid(n: usize) -> String {
    let mut s = String::from("<svg xmlns=\"http://www.w3.org/2000/svg\">\n");
    for i in 0..n {
        let x = (i % 3) * 20;
        let y = (i / 3) * 20;
        s.push_str(&format!("<rect x=\"{x}\" y=\"{y}\" width=\"10\" height=\"10\"/>\n"));
    }
    s.push_str("</svg>");
    s
}

/// Scenario 1: simple SVG 3x3.
#[test]
fn simple_svg_3x3() {
    let svg = svg_grid(9);
    let data = schematic::parse("layout.svg", svg.as_bytes(), &ParseHints::default()).unwrap();
    assert_eq!(data.dies.len(), 9);
    assert_eq!(data.format_type.as_str(), "svg");
    assert_eq!(data.coordinate_system, CoordinateSystem::SvgUnits);
    for die in &data.dies {
        assert!(data.layout_bounds.x_min <= die.bounds.x_min);
        assert!(data.layout_bounds.x_max >= die.bounds.x_max);
        assert!(data.layout_bounds.y_min <= die.bounds.y_min);
        assert!(data.layout_bounds.y_max >= die.bounds.y_max);
        assert!(die.available);
    }
}

/// Scenario 2: 7x7 grid with 4 corner markers (spec.md 8.2.2). The 4 oversized
/// corner shapes fail the area/aspect heuristic and are marked unavailable
/// rather than dropped, so all 53 shapes surface as dies: 49 available, 4
/// not, and the center die sits at the schematic's center.
#[test]
fn svg_7x7_drops_outlier_markers_and_centers() {
    let mut svg = String::from("<svg xmlns=\"http://www.w3.org/2000/svg\">\n");
    for y in 0..7 {
        for x in 0..7 {
            svg.push_str(&format!(
                "<rect x=\"{}\" y=\"{}\" width=\"10\" height=\"10\"/>\n",
                x * 20,
                y * 20
            ));
        }
    }
    for (x, y) in [(-200, -200), (-200, 400), (400, -200), (400, 400)] {
        svg.push_str(&format!(
            "<rect x=\"{x}\" y=\"{y}\" width=\"300\" height=\"300\"/>\n"
        ));
    }
    svg.push_str("</svg>");

    let data = schematic::parse("layout.svg", svg.as_bytes(), &ParseHints::default()).unwrap();
    assert_eq!(data.dies.len(), 53);
    assert_eq!(data.dies.iter().filter(|d| d.available).count(), 49);
    assert_eq!(data.dies.iter().filter(|d| !d.available).count(), 4);

    let center = data
        .dies
        .iter()
        .find(|d| d.die_id == "die_24")
        .expect("center die present");
    let bounds_center_x = (data.layout_bounds.x_min + data.layout_bounds.x_max) / 2.0;
    let bounds_center_y = (data.layout_bounds.y_min + data.layout_bounds.y_max) / 2.0;
    assert!((center.center_x - bounds_center_x).abs() < 10.0);
    assert!((center.center_y - bounds_center_y).abs() < 10.0);
}

fn multi_rule_strategy() -> StrategyDefinition {
    let now = chrono::Utc::now();
    StrategyDefinition {
        id: uuid::Uuid::new_v4(),
        name: "multi-rule".to_string(),
        description: String::new(),
        strategy_type: StrategyType::Custom,
        process_step: "etch".to_string(),
        tool_type: "toolA".to_string(),
        rules: vec![
            RuleConfig {
                rule_type: "fixedPoint".to_string(),
                parameters: serde_json::json!({ "points": [[0, 0], [1, 1], [2, 2]] }),
                weight: 0.4,
                enabled: true,
                conditions: None,
            },
            RuleConfig {
                rule_type: "centerEdge".to_string(),
                parameters: serde_json::json!({ "centerCount": 1, "edgeCount": 1, "edgeMargin": 5.0 }),
                weight: 0.3,
                enabled: true,
                conditions: None,
            },
            RuleConfig {
                rule_type: "uniformGrid".to_string(),
                parameters: serde_json::json!({ "gridSpacing": 1.0 }),
                weight: 0.3,
                enabled: true,
                conditions: None,
            },
        ],
        global_conditions: None,
        transformations: None,
        target_vendor: None,
        vendor_specific_params: serde_json::json!({}),
        version: "1.0.0".to_string(),
        author: "engineer1".to_string(),
        created_at: now,
        modified_at: now,
        lifecycle_state: LifecycleState::Draft,
        schema_version: 1,
    }
}

fn wafer_3x3() -> WaferMap {
    let mut wafer = WaferMap::new();
    for x in 0..3 {
        for y in 0..3 {
            wafer.insert(Die { x, y, available: true });
        }
    }
    wafer
}

/// Scenario 4: multi-rule strategy compiles and every rule contributes.
#[test]
fn multi_rule_strategy_compiles_and_every_rule_fires() {
    let (rules_reg, vendor_reg) = bootstrap();
    let def = multi_rule_strategy();
    let weight_sum: f64 = def.rules.iter().map(|r| r.weight).sum();
    assert!((weight_sum - 1.0).abs() < 1e-9);

    let compiled = compile(&def, &rules_reg, &vendor_reg).expect("should compile");
    let wafer = wafer_3x3();
    let result = execute(&compiled, &wafer, &ExecutionContext::default());

    for rule_name in ["fixedPoint", "centerEdge", "uniformGrid"] {
        assert!(
            result.coverage_stats.rule_distribution.get(rule_name).copied().unwrap_or(0) > 0,
            "expected rule `{rule_name}` to contribute at least one candidate"
        );
    }
}

/// Scenario 6: simulation on a 3x3 grid via the multi-rule strategy.
#[test]
fn simulation_on_3x3_grid_covers_expected_range() {
    let (rules_reg, vendor_reg) = bootstrap();
    let compiled = compile(&multi_rule_strategy(), &rules_reg, &vendor_reg).unwrap();
    let wafer = wafer_3x3();
    let result = execute(&compiled, &wafer, &ExecutionContext::default());

    assert!(result.selected_points.len() >= 3 && result.selected_points.len() <= 9);
    assert!(result.coverage_stats.coverage_pct >= 33.0);
}

/// Scenario 7: ASML export shape.
#[test]
fn asml_export_uses_center_origin_and_expected_keys() {
    let (rules_reg, vendor_reg) = bootstrap();
    let compiled = compile(&multi_rule_strategy(), &rules_reg, &vendor_reg).unwrap();
    let wafer = wafer_3x3();
    let result = execute(&compiled, &wafer, &ExecutionContext::default());

    let meta = StrategyMeta { strategy_version: "1.0.0".to_string(), ..Default::default() };
    let out = AsmlEmitter.emit(&result, &meta, None);
    let doc: serde_json::Value = serde_json::from_slice(&out.bytes).unwrap();
    for key in ["format", "version", "wafer_data", "sampling_points"] {
        assert!(doc.get(key).is_some(), "missing key `{key}`");
    }
    let first_point = &doc["sampling_points"][0];
    assert_eq!(first_point["SiteX"], result.selected_points[0].x);
}

/// Scenario 8: KLA export flips Y and uses corner origin.
#[test]
fn kla_export_flips_y_to_corner_origin() {
    let (rules_reg, vendor_reg) = bootstrap();
    let compiled = compile(&multi_rule_strategy(), &rules_reg, &vendor_reg).unwrap();
    let wafer = wafer_3x3();
    let result = execute(&compiled, &wafer, &ExecutionContext::default());

    let meta = StrategyMeta::default();
    let out = KlaEmitter.emit(&result, &meta, None);
    let xml = String::from_utf8(out.bytes).unwrap();
    assert!(xml.starts_with("<?xml"));
    assert!(xml.contains("<KLA_SamplingPlan version=\"2.0\">"));
    for point in &result.selected_points {
        let enabled = if point.available { "true" } else { "false" };
        assert!(xml.contains(&format!("Enabled=\"{enabled}\"")));
    }
}

/// Scenario 9: lifecycle promote draft -> review -> approved.
#[test]
fn lifecycle_promotes_through_review_to_approved() {
    assert!(check_transition(LifecycleState::Draft, LifecycleState::Review).is_ok());
    assert!(check_transition(LifecycleState::Review, LifecycleState::Approved).is_ok());
    assert!(check_transition(LifecycleState::Draft, LifecycleState::Approved).is_err());
    assert!(check_transition(LifecycleState::Approved, LifecycleState::Draft).is_ok());
}

/// Scenario 10: invalid upload (unrecognized, non-text content) surfaces a
/// parser error rather than panicking.
#[test]
fn invalid_upload_surfaces_parser_error() {
    let bytes = b"this is not a schematic, just prose with no XML or DXF markers";
    let err = schematic::parse("notes.txt", bytes, &ParseHints::default()).unwrap_err();
    match err {
        wafer_sampling_engine::EngineError::ParserError { reason, .. } => {
            assert!(reason.to_lowercase().contains("format") || reason.contains("noDiesDetected"));
        }
        other => panic!("expected ParserError, got {other:?}"),
    }
}
