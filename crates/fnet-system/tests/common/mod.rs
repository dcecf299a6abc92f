// Not every test binary uses every mock.
#![allow(dead_code)]

pub mod mock_unit;
