// THEORY:
// `core_modules` holds the vision layers, leaf first:
// `pixel` -> `frame` -> (`integral`, `template`) -> `ncc` -> `multi_scale`,
// with `bite_detector` consuming frames independently of the matcher.
// Each layer only depends on the ones before it.

pub mod bite_detector;
pub mod frame;
pub mod integral;
pub mod multi_scale;
pub mod ncc;
pub mod pixel;
pub mod template;
