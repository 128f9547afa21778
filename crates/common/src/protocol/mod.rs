// Wire protocol for the admin gateway and the notification service.

pub mod admin;
pub mod notify;
