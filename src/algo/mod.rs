/// Trust Region Policy Optimization
pub mod trpo;
