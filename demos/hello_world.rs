use legion::prelude::*;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Default)]
struct Pos(f32, f32, f32);
#[derive(Clone, Copy, Debug, PartialEq, Default)]
struct Vel(f32, f32, f32);

fn main() {
    let registry = Arc::new(Registry::new());
    let mut world = World::new(registry);

    for _ in 0..4 {
        let entity = world.add_entity();
        world.add_component_with(entity, Pos(1., 2., 3.));
        world.add_component_with(entity, Vel(1., 2., 3.));
    }

    world.for_each_component_set::<(Pos, Vel), _>(|(pos, vel)| {
        pos.0 += vel.0;
        pos.1 += vel.1;
        pos.2 += vel.2;
    });
}
