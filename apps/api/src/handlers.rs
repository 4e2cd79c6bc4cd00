pub mod health;
pub mod role_management;
