use super::{ConfigLayer, ConfigValue};
use crate::error::{ConfigError, Error};

fn layer_with(text: &str) -> ConfigLayer {
    let mut layer = ConfigLayer::new("task/task.cfg");
    layer.add_from_str("inline", text).expect("parse inline config");
    layer
}

#[test]
fn later_layers_override_earlier_ones() {
    let sigma = "[vertical_grid]\ncoord_type = sigma\n";
    let zstar = "[vertical_grid]\ncoord_type = z-star\nvert_levels = 3\n";

    let mut forward = ConfigLayer::new("a.cfg");
    forward.add_from_str("a", sigma).unwrap();
    forward.add_from_str("b", zstar).unwrap();
    assert_eq!(forward.get("vertical_grid", "coord_type").unwrap(), "z-star");

    let mut reversed = ConfigLayer::new("a.cfg");
    reversed.add_from_str("b", zstar).unwrap();
    reversed.add_from_str("a", sigma).unwrap();
    assert_eq!(reversed.get("vertical_grid", "coord_type").unwrap(), "sigma");
    // unmatched options are additive regardless of order
    assert_eq!(reversed.getint("vertical_grid", "vert_levels").unwrap(), 3);
}

#[test]
fn same_merge_sequence_renders_identical_bytes() {
    let build = || {
        let mut layer = ConfigLayer::new("planar/drying_slope/drying_slope.cfg");
        layer.add_from_package("ocean", "default.cfg").unwrap();
        layer
            .add_from_package("ocean.tasks.drying_slope", "drying_slope.cfg")
            .unwrap();
        layer.set("vertical_grid", "coord_type", "sigma");
        layer
    };
    let first = build();
    let second = build();
    assert_eq!(first.render(), second.render());
    assert_eq!(first.digest(), second.digest());
    assert_eq!(first.getint("vertical_grid", "vert_levels").unwrap(), 10);
    assert_eq!(first.getfloat("vertical_grid", "bottom_depth").unwrap(), 10.0);
}

#[test]
fn set_after_package_overrides_and_package_after_set_wins() {
    let mut layer = ConfigLayer::new("x.cfg");
    layer.add_from_package("ocean", "default.cfg").unwrap();
    layer.set("vertical_grid", "coord_type", "sigma");
    assert_eq!(layer.get("vertical_grid", "coord_type").unwrap(), "sigma");

    layer.add_from_package("ocean", "default.cfg").unwrap();
    assert_eq!(layer.get("vertical_grid", "coord_type").unwrap(), "z-star");
}

#[test]
fn typed_getters_coerce_strings() {
    let layer = layer_with(
        "[opts]\ncount = 12\nratio = 0.25\nenabled = yes\nlist = [200., 100., 50.]\nspaced = 1, 2 3\n",
    );
    assert_eq!(layer.getint("opts", "count").unwrap(), 12);
    assert_eq!(layer.getfloat("opts", "count").unwrap(), 12.0);
    assert_eq!(layer.getfloat("opts", "ratio").unwrap(), 0.25);
    assert!(layer.getbool("opts", "enabled").unwrap());
    assert_eq!(
        layer.getlist_float("opts", "list").unwrap(),
        vec![200.0, 100.0, 50.0]
    );
    assert_eq!(layer.getlist_float("opts", "spaced").unwrap(), vec![1.0, 2.0, 3.0]);
    assert_eq!(layer.getlist_str("opts", "spaced").unwrap(), ["1", "2", "3"]);
    assert_eq!(layer.section("opts").getint("count").unwrap(), 12);
}

#[test]
fn whole_floats_outside_the_integer_range_are_rejected() {
    let mut layer = ConfigLayer::new("x.cfg");
    layer.set("opts", "count", 40.0);
    assert_eq!(layer.getint("opts", "count").unwrap(), 40);
    layer.set("opts", "count", 1.0e19);
    let err = layer.getint("opts", "count").unwrap_err();
    assert!(matches!(
        err,
        Error::Config(ConfigError::InvalidValue { expected: "integer", .. })
    ));
    layer.set("opts", "count", -1.0e300);
    assert!(layer.getint("opts", "count").is_err());
}

#[test]
fn missing_section_or_option_is_a_config_error() {
    let layer = layer_with("[opts]\ncount = 1\n");
    let err = layer.getint("opts", "missing").unwrap_err();
    assert!(matches!(
        err,
        Error::Config(ConfigError::MissingOption { ref section, ref option })
            if section == "opts" && option == "missing"
    ));
    assert!(matches!(
        layer.get("nope", "count"),
        Err(Error::Config(ConfigError::MissingOption { .. }))
    ));
}

#[test]
fn invalid_values_report_expected_type() {
    let layer = layer_with("[opts]\ncount = twelve\n");
    let err = layer.getint("opts", "count").unwrap_err();
    assert!(matches!(
        err,
        Error::Config(ConfigError::InvalidValue { expected: "integer", .. })
    ));
}

#[test]
fn parser_handles_comments_and_continuations() {
    let layer = layer_with(
        "# leading comment\n[a]\n; other comment\nkey = first\n    second\nother: 3\n\n[b]\nempty =\n",
    );
    assert_eq!(layer.get("a", "key").unwrap(), "first second");
    assert_eq!(layer.getint("a", "other").unwrap(), 3);
    assert_eq!(layer.get("b", "empty").unwrap(), "");
    assert!(layer.has_option("b", "empty"));
}

#[test]
fn parser_rejects_options_outside_sections() {
    let mut layer = ConfigLayer::new("x.cfg");
    let err = layer.add_from_str("bad.cfg", "key = 1\n").unwrap_err();
    assert!(matches!(
        err,
        Error::Config(ConfigError::Parse { line: 1, .. })
    ));
}

#[test]
fn unknown_package_resource_is_reported() {
    let mut layer = ConfigLayer::new("x.cfg");
    let err = layer.add_from_package("ocean", "missing.cfg").unwrap_err();
    assert!(matches!(
        err,
        Error::Config(ConfigError::UnknownResource { .. })
    ));
}

#[test]
fn render_round_trips_through_reload() {
    let mut layer = ConfigLayer::new("x.cfg");
    layer.add_from_package("ocean", "default.cfg").unwrap();
    layer.set("forward", "dt", 30.0);
    layer.set("forward", "adaptive", true);
    let rendered = layer.render();

    let mut reloaded = ConfigLayer::new("x.cfg");
    reloaded.reload_from_str("x.cfg", &rendered).unwrap();
    assert_eq!(reloaded.render(), rendered);
    assert_eq!(reloaded.getfloat("forward", "dt").unwrap(), 30.0);
    assert!(reloaded.getbool("forward", "adaptive").unwrap());
    assert_eq!(ConfigValue::from(1.0).to_string(), "1.0");
}

#[test]
fn merge_applies_user_layer_last() {
    let mut task = layer_with("[forward]\nsteps = 4\ndt = 60.0\n");
    let user = layer_with("[forward]\nsteps = 8\n[paths]\ndatabase_root = /data\n");
    task.merge(&user);
    assert_eq!(task.getint("forward", "steps").unwrap(), 8);
    assert_eq!(task.getfloat("forward", "dt").unwrap(), 60.0);
    assert_eq!(task.get("paths", "database_root").unwrap(), "/data");
    assert_eq!(task.sources(), ["inline", "inline"]);
}
