/// Sine of an angle given in degrees.
#[macro_export]
macro_rules! sin_deg {
    ($x: expr) => {
        ($x as f64).to_radians().sin()
    };
}

/// Cosine of an angle given in degrees.
#[macro_export]
macro_rules! cos_deg {
    ($x: expr) => {
        ($x as f64).to_radians().cos()
    };
}

/// Two argument arctangent returning degrees.
#[macro_export]
macro_rules! atan2_deg {
    ($y: expr, $x: expr) => {
        ($y as f64).atan2($x as f64).to_degrees()
    };
}

/// Inclusive range check, false for NaN.
#[macro_export]
macro_rules! in_range {
    ($lb: expr, $ub: expr, $val: expr) => {
        $val >= $lb && $val <= $ub
    };
}

/// Evaluates to true when any of the given values is the missing sentinel.
#[macro_export]
macro_rules! any_missing {
    ($($val: expr),+ $(,)?) => {
        false $(|| ($val as f64).is_nan())+
    };
}
