
use assertables::*;
use rstest::*;
use serde_json::json;

use super::*;
