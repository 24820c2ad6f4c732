use pretty_assertions::assert_eq;

use super::*;
use crate::app::ClassFlags;

fn setup() -> (AppView, TypeId, TypeId) {
    let mut app = AppView::new();
    let object = app.well_known().object;
    let a = app.define_class("LA;", Some(object), ClassFlags::empty());
    let b = app.define_class("LB;", Some(a), ClassFlags::empty());
    (app, a, b)
}

#[test]
fn nullability_join_is_least_upper_bound() {
    use Nullability::*;
    assert_eq!(Bottom.join(DefinitelyNull), DefinitelyNull);
    assert_eq!(DefinitelyNull.join(DefinitelyNotNull), Maybe);
    assert_eq!(DefinitelyNotNull.join(DefinitelyNotNull), DefinitelyNotNull);
    assert!(DefinitelyNotNull.less_than_or_equal(Maybe));
    assert!(!Maybe.less_than_or_equal(DefinitelyNull));
}

#[test]
fn subclass_is_less_than_superclass() {
    let (app, a, b) = setup();
    let a_t = TypeElement::from_type(a, Nullability::Maybe, &app);
    let b_t = TypeElement::from_type(b, Nullability::Maybe, &app);
    assert!(b_t.strictly_less_than(a_t, &app));
    assert!(!a_t.less_than_or_equal(b_t, &app));
}

#[test]
fn non_null_refines_maybe_null() {
    let (app, a, _) = setup();
    let maybe = TypeElement::from_type(a, Nullability::Maybe, &app);
    let non_null = maybe.with_nullability(Nullability::DefinitelyNotNull);
    assert!(non_null.strictly_less_than(maybe, &app));
    assert!(!non_null.is_nullable());
    assert!(maybe.is_nullable());
}

#[test]
fn null_is_below_every_nullable_reference() {
    let (app, a, _) = setup();
    let maybe = TypeElement::from_type(a, Nullability::Maybe, &app);
    assert!(TypeElement::null().less_than_or_equal(maybe, &app));
    let non_null = maybe.with_nullability(Nullability::DefinitelyNotNull);
    assert!(!TypeElement::null().less_than_or_equal(non_null, &app));
}

#[test]
fn primitives_are_only_related_to_themselves() {
    let (app, a, _) = setup();
    let int = TypeElement::Primitive(PrimitiveType::Int);
    let boolean = TypeElement::Primitive(PrimitiveType::Boolean);
    assert!(boolean.is_boolean());
    assert!(!int.less_than_or_equal(boolean, &app));
    assert!(!int.less_than_or_equal(TypeElement::from_type(a, Nullability::Maybe, &app), &app));
    assert!(TypeElement::Bottom.less_than_or_equal(int, &app));
    assert!(int.less_than_or_equal(TypeElement::Top, &app));
}
