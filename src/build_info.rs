mod raw {
    // The constants generated by `built` (see build.rs). Only a few of them are used.
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

/// RGC crate version such as 0.1.0
pub const RGC_PKG_VERSION: &str = raw::PKG_VERSION;

/// Comma separated features enabled for this build
pub const RGC_FEATURES: &str = raw::FEATURES_STR;

/// `release` for release builds, `debug` for other builds.
pub const RGC_PROFILE: &str = raw::PROFILE;
