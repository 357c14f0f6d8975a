//! Fixed identifiers shared by the fixtures and the tests.
#![allow(dead_code)]

pub const REGION_US: &str = "US";
pub const REGION_GB: &str = "GB";

pub const SONG_A_ID: &str = "abc";
pub const SONG_A_NAME: &str = "Song A";
pub const SONG_B_ID: &str = "def";
pub const SONG_B_NAME: &str = "Song B";

pub const ARTIST_X_ID: &str = "x";
pub const ARTIST_X_NAME: &str = "Artist X";
pub const ARTIST_Y_ID: &str = "y";
pub const ARTIST_Y_NAME: &str = "Artist Y";

/// Date printed in the title of [`super::us_chart_page`].
pub const CHART_DATE: (i32, u32, u32) = (2024, 5, 17);
