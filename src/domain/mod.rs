// Domain layer: upload models and the object store port.

pub mod model;
pub mod ports;
