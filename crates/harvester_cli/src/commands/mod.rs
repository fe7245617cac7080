pub(crate) mod limits;
pub(crate) mod meta;
pub(crate) mod reset;
pub(crate) mod run;
pub(crate) mod shared;
pub(crate) mod status;
