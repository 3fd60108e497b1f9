pub mod record;
pub mod replay;
