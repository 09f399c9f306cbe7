// Domain layer: entities exchanged with the remote service and the ports the core depends on.

pub mod model;
pub mod ports;
