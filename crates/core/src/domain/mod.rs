pub mod coupon;
pub mod member;
pub mod receipt;
pub mod venue;
