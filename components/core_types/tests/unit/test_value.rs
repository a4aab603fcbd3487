//! Unit tests for Value and ObjectRef

use core_types::{format_number, ObjectRef, Value};

#[cfg(test)]
mod value_creation_tests {
    use super::*;

    #[test]
    fn test_value_nil() {
        let val = Value::Nil;
        assert!(matches!(val, Value::Nil));
        assert_eq!(val.type_name(), "nil");
    }

    #[test]
    fn test_value_bool() {
        assert!(matches!(Value::from(true), Value::Bool(true)));
        assert_eq!(Value::Bool(false).type_name(), "bool");
    }

    #[test]
    fn test_value_number() {
        let val = Value::from(1.5);
        assert_eq!(val.as_number(), Some(1.5));
        assert_eq!(val.type_name(), "number");
    }

    #[test]
    fn test_value_object() {
        let r = ObjectRef::new(12, 5);
        let val = Value::from(r);
        assert_eq!(val.as_object(), Some(r));
        assert_eq!(val.type_name(), "object");
        assert_eq!(r.index(), 12);
        assert_eq!(r.generation(), 5);
    }

    #[test]
    fn test_value_is_copy() {
        let a = Value::Number(2.0);
        let b = a;
        assert_eq!(a, b);
    }
}

#[cfg(test)]
mod ieee_semantics_tests {
    use super::*;

    #[test]
    fn test_nan_never_equal() {
        assert_ne!(Value::Number(f64::NAN), Value::Number(f64::NAN));
    }

    #[test]
    fn test_signed_zero_equal() {
        assert_eq!(Value::Number(0.0), Value::Number(-0.0));
    }

    #[test]
    fn test_infinity_formatting() {
        assert_eq!(format_number(f64::NEG_INFINITY), "-inf");
        assert_eq!(format_number(-7.0), "-7");
        assert_eq!(format_number(0.1 + 0.2), "0.30000000000000004");
    }
}
