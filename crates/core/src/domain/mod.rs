pub mod address;
pub mod cart;
pub mod catalog;
pub mod conversation;
pub mod order;
pub mod payment;
