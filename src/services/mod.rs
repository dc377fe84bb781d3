pub mod checkout;
pub mod import;
pub mod order_status;
pub mod orders;
