use super::*;
use crate::error::Error;

struct Noop;

impl StepRunner for Noop {
    fn run(&self, _ctx: &RunContext<'_>) -> Result<()> {
        Ok(())
    }
}

/// Steps per resolution plus one analysis step reading every forward run.
struct Series {
    subdir: &'static str,
}

impl TaskRecipe for Series {
    fn plan(&self, config: &ConfigLayer) -> Result<Vec<StepPlan>> {
        let resolutions = config.getlist_float("series", "resolutions")?;
        let mut plans = Vec::new();
        for res in &resolutions {
            let indir = format!("{}/{res}", self.subdir);
            let init_dir = format!("{indir}/init");
            plans.push(StepPlan::new(init_dir.clone(), {
                let indir = indir.clone();
                move |_| {
                    let mut step = Step::new(&indir, "init", Noop);
                    step.add_output_file("initial_state.nc", &["temperature"]);
                    Ok(step)
                }
            }));
            plans.push(StepPlan::new(format!("{indir}/forward"), move |ctx| {
                let init = ctx.step_id(&init_dir)?;
                let mut step = Step::new(&indir, "forward", Noop);
                step.add_input_from_step("init.nc", init, "initial_state.nc")
                    .add_output_file("output.nc", &[]);
                Ok(step)
            }));
        }
        let subdir = self.subdir;
        plans.push(StepPlan::new(format!("{subdir}/analysis"), move |ctx| {
            let mut step = Step::new(subdir, "analysis", Noop);
            for res in &resolutions {
                let forward = ctx.step_id(&format!("{subdir}/{res}/forward"))?;
                step.add_input_from_step(&format!("output_{res}.nc"), forward, "output.nc");
            }
            Ok(step)
        }));
        plans.push(
            StepPlan::new(format!("{subdir}/viz"), move |_| Ok(Step::new(subdir, "viz", Noop)))
                .optional(),
        );
        Ok(plans)
    }
}

/// Reuses a base mesh other tasks may already have registered.
struct WithBaseMesh {
    subdir: &'static str,
}

impl TaskRecipe for WithBaseMesh {
    fn plan(&self, config: &ConfigLayer) -> Result<Vec<StepPlan>> {
        let res = config.getint("mesh", "resolution")?;
        let mesh_dir = format!("shared/base_mesh/{res}km");
        let subdir = self.subdir;
        Ok(vec![
            StepPlan::new(mesh_dir.clone(), move |_| {
                let mut step = Step::at(mesh_dir, Noop);
                step.add_output_file("base_mesh.nc", &[]);
                Ok(step)
            })
            .symlink(format!("base_mesh/mesh_{res}km")),
            StepPlan::new(format!("{subdir}/init"), move |ctx| {
                let mesh = ctx.step_id(&format!("shared/base_mesh/{res}km"))?;
                let mut step = Step::new(subdir, "init", Noop);
                step.add_input_from_step("mesh.nc", mesh, "base_mesh.nc");
                Ok(step)
            }),
        ])
    }
}

fn series_task(component: &mut Component, resolutions: &str) -> String {
    let mut layer = ConfigLayer::new("series/series.cfg");
    layer.set("series", "resolutions", resolutions);
    let config = component.add_config(layer);
    let mut task = Task::new("series", "series").with_recipe(Series { subdir: "series" });
    task.set_shared_config(config, Some("series.cfg"));
    component.add_task(task).unwrap();
    "series".to_string()
}

fn step_paths(component: &Component, task: &str) -> Vec<String> {
    let task = component.task(task).unwrap();
    let mut paths: Vec<String> = task
        .steps()
        .iter()
        .map(|member| component.step_by_id(member.step).unwrap().subdir().to_string())
        .collect();
    paths.sort();
    paths
}

#[test]
fn same_path_resolves_to_same_step() {
    let mut component = Component::new("ocean");
    let first = component
        .step_or_insert_with("a/init", || Ok(Step::at("a/init", Noop)))
        .unwrap();
    let second = component
        .step_or_insert_with("a/init", || panic!("must reuse the registered step"))
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(component.step_id("a/init"), Some(first));
    assert_eq!(component.step_count(), 1);
}

#[test]
fn distinct_step_at_occupied_path_is_rejected() {
    let mut component = Component::new("ocean");
    component.add_step(Step::at("a/init", Noop)).unwrap();
    let err = component.add_step(Step::at("a/init", Noop)).unwrap_err();
    assert!(matches!(err, Error::DuplicateStep(ref path) if path == "a/init"));
    assert_eq!(err.kind(), "duplicate_registration");
}

#[test]
fn lookups_of_unknown_paths_fail() {
    let component = Component::new("ocean");
    assert!(matches!(component.step("nope"), Err(Error::StepNotFound(_))));
    assert!(matches!(component.task("nope"), Err(Error::TaskNotFound(_))));
}

#[test]
fn duplicate_task_and_alias_collisions_are_rejected() {
    let mut component = Component::new("ocean");
    let init = component.add_step(Step::at("group/init", Noop)).unwrap();
    let forward = component.add_step(Step::at("group/task/forward", Noop)).unwrap();

    let mut task = Task::new("task", "group/task");
    task.add_step(init, Some("init")).add_step(forward, None);
    component.add_task(task).unwrap();

    let err = component.add_task(Task::new("task", "group/task")).unwrap_err();
    assert!(matches!(err, Error::DuplicateTask(_)));

    let mut clash = Task::new("clash", "group/clash");
    let inner = component.add_step(Step::at("group/clash/init", Noop)).unwrap();
    clash.add_step(init, Some("init")).add_step(inner, None);
    let err = component.add_task(clash).unwrap_err();
    assert!(matches!(err, Error::DuplicateStep(ref path) if path == "group/clash/init"));
}

#[test]
fn task_members_adopt_the_task_config() {
    let mut component = Component::new("ocean");
    let init = component.add_step(Step::at("group/task/init", Noop)).unwrap();
    let mut task = Task::new("task", "group/task");
    task.add_step(init, None);
    component.add_task(task).unwrap();

    let config = component.task("group/task").unwrap().config().unwrap();
    assert_eq!(component.config(config).filepath(), "group/task/task.cfg");
    component.config_mut(config).set("vertical_grid", "coord_type", "sigma");
    assert_eq!(
        component
            .effective_config(init)
            .unwrap()
            .get("vertical_grid", "coord_type")
            .unwrap(),
        "sigma"
    );
}

#[test]
fn user_config_is_merged_into_every_layer() {
    let mut component = Component::new("ocean");
    let mut owned = Step::at("a/init", Noop);
    owned.config_mut().unwrap().set("forward", "steps", 4);
    let owned = component.add_step(owned).unwrap();
    let mut shared = ConfigLayer::new("a/a.cfg");
    shared.set("forward", "steps", 4);
    let shared = component.add_config(shared);

    let mut user = ConfigLayer::new("user.cfg");
    user.set("forward", "steps", 8);
    component.apply_user_config(&user);

    assert_eq!(component.config(shared).getint("forward", "steps").unwrap(), 8);
    assert_eq!(
        component
            .effective_config(owned)
            .unwrap()
            .getint("forward", "steps")
            .unwrap(),
        8
    );
}

#[test]
fn configure_twice_leaves_exactly_the_new_step_set() {
    let mut component = Component::new("ocean");
    let task = series_task(&mut component, "1, 2");
    assert_eq!(
        step_paths(&component, &task),
        [
            "series/1/forward",
            "series/1/init",
            "series/2/forward",
            "series/2/init",
            "series/analysis",
            "series/viz",
        ]
    );

    let config = component.task(&task).unwrap().config().unwrap();
    component.config_mut(config).set("series", "resolutions", "2, 4");
    let diff = component.configure_task(&task).unwrap();
    assert_eq!(diff.added, ["series/4/forward", "series/4/init"]);
    assert_eq!(diff.removed, ["series/1/forward", "series/1/init"]);

    assert_eq!(
        step_paths(&component, &task),
        [
            "series/2/forward",
            "series/2/init",
            "series/4/forward",
            "series/4/init",
            "series/analysis",
            "series/viz",
        ]
    );
    assert_eq!(component.step_id("series/1/init"), None);
    assert_eq!(component.step_id("series/1/forward"), None);
    assert_eq!(component.step_count(), 6);

    // the analysis step was rebuilt against the new forwards only
    let analysis = component.step("series/analysis").unwrap();
    let inputs: Vec<&str> = analysis.inputs().iter().map(|i| i.filename.as_str()).collect();
    assert_eq!(inputs, ["output_2.nc", "output_4.nc"]);

    let again = component.configure_task(&task).unwrap();
    assert!(again.is_empty());
    assert_eq!(component.step_count(), 6);
}

#[test]
fn optional_steps_are_not_run_by_default() {
    let mut component = Component::new("ocean");
    let task = series_task(&mut component, "1");
    let viz = component.step_id("series/viz").unwrap();
    let task = component.task(&task).unwrap();
    assert!(task.contains(viz));
    assert!(!task.default_steps().any(|id| id == viz));
}

#[test]
fn sibling_tasks_share_one_base_mesh() {
    let mut component = Component::new("ocean");
    let mut ids = Vec::new();
    for subdir in ["family/a", "family/b"] {
        let mut layer = ConfigLayer::new(format!("{subdir}/task.cfg"));
        layer.set("mesh", "resolution", 120);
        let config = component.add_config(layer);
        let mut task = Task::new("task", subdir).with_recipe(WithBaseMesh { subdir });
        task.set_shared_config(config, None);
        component.add_task(task).unwrap();
        ids.push(component.step_id("shared/base_mesh/120km").unwrap());
    }
    assert_eq!(ids[0], ids[1]);
    assert_eq!(
        component.tasks_using(ids[0]),
        ["family/a", "family/b"]
    );
    let member = &component.task("family/b").unwrap().steps()[0];
    assert_eq!(member.alias.as_deref(), Some("base_mesh/mesh_120km"));

    // moving one sibling to a new resolution keeps the mesh the other uses
    let config = component.task("family/a").unwrap().config().unwrap();
    component.config_mut(config).set("mesh", "resolution", 240);
    let diff = component.configure_task("family/a").unwrap();
    assert!(diff.removed.contains(&"shared/base_mesh/120km".to_string()));
    assert_eq!(component.step_id("shared/base_mesh/120km"), Some(ids[0]));
    assert!(component.step_id("shared/base_mesh/240km").is_some());
    assert_eq!(component.tasks_using(ids[0]), ["family/b"]);
}

#[test]
fn relative_path_through_a_task_alias_is_an_edge() {
    let mut component = Component::new("ocean");
    let mut init = Step::at("fam/1km/init", Noop);
    init.add_output_file("output.nc", &[]);
    let init = component.add_step(init).unwrap();
    let mut forward = Step::new("fam/1km/default", "forward", Noop);
    forward.add_input_from_path("init.nc", "../init/output.nc");
    let forward = component.add_step(forward).unwrap();

    let mut task = Task::new("default", "fam/1km/default");
    task.add_step(init, Some("init")).add_step(forward, None);
    component.add_task(task).unwrap();

    assert_eq!(crate::graph::dependencies(&component, forward).unwrap(), [init]);
    let steps = [init, forward].into_iter().collect();
    let graph = crate::graph::build(&component, &steps).unwrap();
    assert_eq!(graph.levels(), [vec![init], vec![forward]]);

    // an alias prefix must end at a path separator
    let mut stray = Step::new("fam/1km/default", "stray", Noop);
    stray.add_input_from_path("init.nc", "../initial/output.nc");
    let stray = component.add_step(stray).unwrap();
    assert!(crate::graph::dependencies(&component, stray).unwrap().is_empty());
}

#[test]
fn reading_an_undeclared_output_is_a_setup_error() {
    let mut component = Component::new("ocean");
    let mut init = Step::at("a/init", Noop);
    init.add_output_file("init.nc", &[]);
    let init = component.add_step(init).unwrap();

    let mut forward = Step::at("a/forward", Noop);
    forward.add_input_from_step("init.nc", init, "no_such_output.nc");
    let err = component.add_step(forward).unwrap_err();
    assert!(matches!(
        err,
        Error::UndeclaredOutput { ref producer, ref filename, .. }
            if producer == "a/init" && filename == "no_such_output.nc"
    ));
    assert_eq!(err.kind(), "undeclared_output");
    assert!(component.step_id("a/forward").is_none());
}

#[test]
fn detaching_a_shared_member_keeps_it_for_other_tasks() {
    let mut component = Component::new("ocean");
    let mesh = component.add_step(Step::at("shared/mesh", Noop)).unwrap();
    for subdir in ["family/a", "family/b"] {
        let mut task = Task::new("task", subdir);
        task.add_step(mesh, Some("mesh"));
        component.add_task(task).unwrap();
    }

    let mut detached = Task::new("task", "family/c");
    detached.add_step(mesh, None);
    assert!(detached.remove_step(mesh));
    assert!(!detached.remove_step(mesh));
    assert!(detached.steps().is_empty());

    let mut layer = ConfigLayer::new("family/d/task.cfg");
    layer.set("mesh", "resolution", 120);
    let config = component.add_config(layer);
    let mut task = Task::new("task", "family/d").with_recipe(WithBaseMesh { subdir: "family/d" });
    task.set_shared_config(config, None);
    component.add_task(task).unwrap();
    let shared = component.step_id("shared/base_mesh/120km").unwrap();
    let mut task = Task::new("task", "family/e").with_recipe(WithBaseMesh { subdir: "family/e" });
    let layer = ConfigLayer::new("family/e/task.cfg");
    let config = component.add_config(layer);
    component.config_mut(config).set("mesh", "resolution", 120);
    task.set_shared_config(config, None);
    component.add_task(task).unwrap();

    // reconfiguring detaches every member first; the mesh survives for d
    component.config_mut(config).set("mesh", "resolution", 60);
    component.configure_task("family/e").unwrap();
    assert_eq!(component.step_id("shared/base_mesh/120km"), Some(shared));
    assert_eq!(component.tasks_using(shared), ["family/d"]);
    assert_eq!(component.tasks_using(mesh), ["family/a", "family/b"]);
}

/// Builds its only step somewhere other than the planned directory.
struct Misplaced;

impl TaskRecipe for Misplaced {
    fn plan(&self, _config: &ConfigLayer) -> Result<Vec<StepPlan>> {
        Ok(vec![StepPlan::new("m/init", |_| Ok(Step::at("m/elsewhere", Noop)))])
    }
}

#[test]
fn factory_building_the_wrong_path_is_a_mismatch() {
    let mut component = Component::new("ocean");
    let err = component
        .step_or_insert_with("a/init", || Ok(Step::at("a/other", Noop)))
        .unwrap_err();
    assert!(matches!(
        err,
        Error::StepPathMismatch { ref expected, ref actual }
            if expected == "a/init" && actual == "a/other"
    ));
    assert_eq!(err.kind(), "path_mismatch");

    let err = component
        .add_task(Task::new("m", "m").with_recipe(Misplaced))
        .unwrap_err();
    assert_eq!(err.kind(), "path_mismatch");
    assert!(component.step_id("m/elsewhere").is_none());
}
