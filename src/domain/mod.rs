// Domain layer: request/response data and the ports to external collaborators.

pub mod model;
pub mod ports;
