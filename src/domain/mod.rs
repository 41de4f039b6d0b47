//! Settlement entities, value objects and the ports the engine consumes.

pub mod invoice;
pub mod money;
pub mod payment;
pub mod ports;
pub mod subscription;
pub mod wallet;
