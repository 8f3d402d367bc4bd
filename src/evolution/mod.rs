pub mod fitness;
pub mod population;
pub mod topology;
pub mod transport;
