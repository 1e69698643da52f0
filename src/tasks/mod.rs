mod maintenance;

pub use maintenance::MaintenanceTask;
