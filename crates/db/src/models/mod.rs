pub mod boost_product;
pub mod boost_purchase;
pub mod credits_ledger;
pub mod form;
pub mod form_response;
pub mod profile;
pub mod question;
pub mod rate_limit;
