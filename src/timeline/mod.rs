pub(crate) mod morph;
pub(crate) mod reconstruct;
