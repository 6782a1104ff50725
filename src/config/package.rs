/// Config files embedded in the binary, addressed by (package, resource).
struct PackagedConfig {
    package: &'static str,
    resource: &'static str,
    text: &'static str,
}

const PACKAGED: &[PackagedConfig] = &[
    PackagedConfig {
        package: "ocean",
        resource: "default.cfg",
        text: include_str!("../../defaults/ocean/default.cfg"),
    },
    PackagedConfig {
        package: "ocean.convergence",
        resource: "convergence.cfg",
        text: include_str!("../../defaults/ocean/convergence.cfg"),
    },
    PackagedConfig {
        package: "ocean.tasks.drying_slope",
        resource: "drying_slope.cfg",
        text: include_str!("../../defaults/ocean/drying_slope.cfg"),
    },
    PackagedConfig {
        package: "ocean.tasks.ice_shelf_2d",
        resource: "ice_shelf_2d.cfg",
        text: include_str!("../../defaults/ocean/ice_shelf_2d.cfg"),
    },
    PackagedConfig {
        package: "ocean.tasks.manufactured_solution",
        resource: "manufactured_solution.cfg",
        text: include_str!("../../defaults/ocean/manufactured_solution.cfg"),
    },
    PackagedConfig {
        package: "ocean.tasks.global_ocean",
        resource: "global_ocean.cfg",
        text: include_str!("../../defaults/ocean/global_ocean.cfg"),
    },
    PackagedConfig {
        package: "ocean.tasks.sphere_transport",
        resource: "sphere_transport.cfg",
        text: include_str!("../../defaults/ocean/sphere_transport.cfg"),
    },
];

pub fn lookup_packaged(package: &str, resource: &str) -> Option<&'static str> {
    PACKAGED
        .iter()
        .find(|entry| entry.package == package && entry.resource == resource)
        .map(|entry| entry.text)
}
