use super::*;
use crate::graph;
use std::collections::BTreeSet;

fn member_paths(component: &Component, task: &str) -> Vec<String> {
    component
        .task(task)
        .unwrap()
        .steps()
        .iter()
        .map(|member| component.step_by_id(member.step).unwrap().subdir().to_string())
        .collect()
}

#[test]
fn catalogue_registers_every_family() {
    let component = build_component().unwrap();
    let tasks: Vec<&str> = component.tasks().map(|(_, task)| task.subdir()).collect();
    assert_eq!(tasks.len(), 40);
    assert!(tasks.contains(&"planar/drying_slope/sigma/1km/barotropic/decomp"));
    assert!(tasks.contains(&"planar/drying_slope/z-star/1km/baroclinic/ramp"));
    let longest = "planar/ice_shelf_2d/2km_thinfilm/default_tidal_forcing_time_varying_forcing";
    assert!(tasks.contains(&longest));
    assert!(tasks.contains(&"planar/manufactured_solution/del4"));
    assert!(tasks.contains(&"spherical/icos/global_ocean/with_viz"));
    assert!(tasks.contains(&"spherical/icos/correlated_tracers_2d"));
}

#[test]
fn catalogue_graph_is_acyclic() {
    let component = build_component().unwrap();
    let steps: BTreeSet<_> = component.steps().map(|(id, _)| id).collect();
    let graph = graph::build(&component, &steps).unwrap();
    assert_eq!(graph.len(), component.step_count());
}

#[test]
fn barotropic_tasks_share_their_init() {
    let component = build_component().unwrap();
    let indir = "planar/drying_slope/single_layer/250m/barotropic";
    let init = component.step_id(&format!("{indir}/init")).unwrap();
    for name in ["standard", "ramp", "ramp_loglaw"] {
        let task = component.task(&format!("{indir}/{name}")).unwrap();
        assert!(task.contains(init));
        assert_eq!(task.config_link(), Some("drying_slope.cfg"));
    }
    assert_eq!(component.tasks_using(init).len(), 3);
    let config = component.effective_config(init).unwrap();
    assert_eq!(config.get("vertical_grid", "coord_type").unwrap(), "single_layer");
    assert_eq!(config.getfloat("vertical_grid", "bottom_depth").unwrap(), 10.0);
}

#[test]
fn ice_shelf_tasks_share_the_adjustment_chain() {
    let component = build_component().unwrap();
    let resdir = "planar/ice_shelf_2d/5km";
    let default = member_paths(&component, &format!("{resdir}/default"));
    assert_eq!(default.len(), 1 + 20 + 2);
    assert_eq!(default[0], format!("{resdir}/init"));
    assert_eq!(default[20], format!("{resdir}/ssh_adjustment/ssh_adjust_9"));

    let forward_9 = component
        .step_id(&format!("{resdir}/ssh_adjustment/ssh_forward_9"))
        .unwrap();
    assert_eq!(component.tasks_using(forward_9).len(), 4);
    let forward = component.step_id(&format!("{resdir}/default/forward")).unwrap();
    let adjust_9 = component
        .step_id(&format!("{resdir}/ssh_adjustment/ssh_adjust_9"))
        .unwrap();
    assert_eq!(graph::dependencies(&component, forward).unwrap(), vec![adjust_9]);
}

#[test]
fn fewer_adjustment_iterations_prune_the_tail_of_the_chain() {
    let mut component = build_component().unwrap();
    let mut user = ConfigLayer::new("user.cfg");
    user.add_from_str("user.cfg", "[ssh_adjustment]\niterations = 1\n")
        .unwrap();
    component.apply_user_config(&user);
    let resdir = "planar/ice_shelf_2d/2km";
    for name in [
        "default",
        "default_tidal_forcing",
        "default_time_varying_forcing",
        "default_tidal_forcing_time_varying_forcing",
    ] {
        component.configure_task(&format!("{resdir}/{name}")).unwrap();
    }
    assert!(component
        .step_id(&format!("{resdir}/ssh_adjustment/ssh_adjust_0"))
        .is_some());
    assert!(component
        .step_id(&format!("{resdir}/ssh_adjustment/ssh_forward_1"))
        .is_none());
    assert_eq!(member_paths(&component, &format!("{resdir}/default")).len(), 5);
}

#[test]
fn global_ocean_tasks_share_the_base_mesh() {
    let mut component = build_component().unwrap();
    let mut user = ConfigLayer::new("user.cfg");
    user.add_from_str("user.cfg", "[global_ocean]\nresolution = 480\n")
        .unwrap();
    component.apply_user_config(&user);
    for task in ["spherical/icos/global_ocean", "spherical/icos/global_ocean/with_viz"] {
        component.configure_task(task).unwrap();
    }

    let mesh = component.step_id("spherical/icos/base_mesh/480km").unwrap();
    assert_eq!(
        component.tasks_using(mesh),
        ["spherical/icos/global_ocean", "spherical/icos/global_ocean/with_viz"]
    );
    assert!(component.step_id("spherical/icos/base_mesh/30km").is_none());
    let viz = component.task("spherical/icos/global_ocean/with_viz").unwrap();
    let aliases: Vec<&str> = viz
        .steps()
        .iter()
        .filter_map(|member| member.alias.as_deref())
        .collect();
    assert_eq!(aliases, ["base_mesh/icos_480km", "topo_remap", "init"]);
}

#[test]
fn sphere_transport_reuses_the_global_ocean_mesh() {
    let mut component = build_component().unwrap();
    let mut user = ConfigLayer::new("user.cfg");
    user.add_from_str("user.cfg", "[global_ocean]\nresolution = 480\n")
        .unwrap();
    component.apply_user_config(&user);
    component
        .configure_task("spherical/icos/global_ocean")
        .unwrap();

    let mesh = component.step_id("spherical/icos/base_mesh/480km").unwrap();
    let users = component.tasks_using(mesh);
    assert!(users.contains(&"spherical/icos/global_ocean"));
    assert!(users.contains(&"spherical/icos/rotation_2d"));
    assert!(users.contains(&"spherical/icos/correlated_tracers_2d"));

    let init = component
        .step_id("spherical/icos/rotation_2d/480km/init")
        .unwrap();
    let forward = component
        .step_id("spherical/icos/rotation_2d/480km/forward")
        .unwrap();
    let viz = component.step_id("spherical/icos/rotation_2d/viz").unwrap();
    assert_eq!(graph::dependencies(&component, init).unwrap(), [mesh]);
    assert_eq!(graph::dependencies(&component, forward).unwrap(), [init]);
    assert_eq!(graph::dependencies(&component, viz).unwrap().len(), 2);

    let task = component.task("spherical/icos/rotation_2d").unwrap();
    assert!(!task.default_steps().any(|step| step == viz));
}

#[test]
fn convergence_series_follows_user_resolutions() {
    let mut component = build_component().unwrap();
    let task = "planar/manufactured_solution/del2";
    let mut user = ConfigLayer::new("user.cfg");
    user.add_from_str("user.cfg", "[convergence]\nresolutions = 100, 50\n")
        .unwrap();
    component.apply_user_config(&user);
    let diff = component.configure_task(task).unwrap();
    assert!(diff.added.is_empty());
    assert!(diff.removed.contains(&format!("{task}/init/200km")));
    assert!(diff.removed.contains(&format!("{task}/forward/25km")));
    assert!(component.step_id(&format!("{task}/forward/25km")).is_none());

    let analysis = component.step(&format!("{task}/analysis")).unwrap();
    let inputs: Vec<&str> = analysis
        .inputs()
        .iter()
        .map(|input| input.filename.as_str())
        .collect();
    assert_eq!(inputs, ["output_100km.nc", "output_50km.nc"]);
}
