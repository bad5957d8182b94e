pub(crate) mod check;
pub(crate) mod derive;
pub(crate) mod validate;
