
use km_testutils::*;
use rstest::*;

use super::*;
use crate::prelude::*;
