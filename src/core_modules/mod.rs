pub mod calibration;
pub mod edge_case;
pub mod frame_sample;
pub mod kinematics;
pub mod panorama;
pub mod utils;
