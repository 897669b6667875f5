pub mod parse;
pub mod stripe;
pub mod supabase;

#[cfg(test)]
pub(crate) mod fakes;
