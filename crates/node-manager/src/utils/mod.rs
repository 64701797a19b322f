pub mod logging;
pub mod signal;
#[cfg(test)]
pub(crate) mod test_helper;
