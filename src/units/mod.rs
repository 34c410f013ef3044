//! Small astronomical unit conversions exposed as CLI utilities.

pub mod angular;
pub mod coords;
pub mod cosmology;
pub mod time;

pub use angular::{arcsec_to_parsec, parsec_to_arcsec, AngularMode};
pub use coords::{
    correct_proper_motion, format_hmsdms, format_sexagesimal, parse_position, parse_sexagesimal,
    CoordFormat, ProperMotionCorrection,
};
pub use cosmology::FlatLambdaCdm;
pub use time::{parse_time, Epoch, TimeFormat};
