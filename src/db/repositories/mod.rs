pub mod sessions;
pub mod transitions;
