//! Allocation, refcount, and acyclic fast-path tests.

use std::cell::Cell;

use ouro_gc::{Context, Handle, Managed};

thread_local! {
    static DROPS: Cell<usize> = const { Cell::new(0) };
}

fn drops() -> usize {
    DROPS.with(Cell::get)
}

#[derive(Managed)]
struct Plain {
    x: i32,
}

#[derive(Managed)]
struct Node {
    value: i32,
    #[gc(slot)]
    next: Handle<Node>,
}

impl Drop for Node {
    fn drop(&mut self) {
        DROPS.with(|d| d.set(d.get() + 1));
    }
}

#[test]
fn simple_alloc_and_free() {
    let ctx = Context::new();
    let h = ctx.make(Plain { x: 7 });
    assert_eq!(h.borrow().x, 7);
    assert_eq!(ctx.len(), 1);
    drop(h);
    assert_eq!(ctx.len(), 0);
}

#[test]
fn clone_and_drop_track_the_count() {
    let ctx = Context::new();
    let a = ctx.make(Plain { x: 1 });
    assert_eq!(Handle::strong_count(&a), 1);
    let b = a.clone();
    let c = b.clone();
    assert_eq!(Handle::strong_count(&a), 3);
    assert!(Handle::ptr_eq(&a, &c));
    drop(b);
    assert_eq!(Handle::strong_count(&a), 2);
    drop(c);
    assert_eq!(Handle::strong_count(&a), 1);
}

#[test]
fn move_does_not_touch_the_count() {
    let ctx = Context::new();
    let a = ctx.make(Plain { x: 1 });
    assert_eq!(Handle::strong_count(&a), 1);
    let moved = a;
    assert_eq!(Handle::strong_count(&moved), 1);
}

#[test]
fn null_handles() {
    let null = Handle::<Plain>::null();
    assert!(null.is_null());
    assert_eq!(Handle::strong_count(&null), 0);
    assert!(Handle::ptr_eq(&null, &Handle::default()));

    let ctx = Context::new();
    let a = ctx.make(Plain { x: 1 });
    assert!(!a.is_null());
    assert!(!Handle::ptr_eq(&a, &null));
}

#[test]
fn linear_chain_cascades_on_last_drop() {
    let ctx = Context::new();
    let start = drops();

    let a = ctx.make(Node {
        value: 1,
        next: Handle::null(),
    });
    let b = ctx.make(Node {
        value: 2,
        next: Handle::null(),
    });
    a.borrow_mut().next = b.clone();
    drop(b);

    // `b` is still alive through `a`.
    assert_eq!(ctx.len(), 2);
    assert_eq!(a.borrow().next.borrow().value, 2);
    assert_eq!(Handle::strong_count(&a.borrow().next), 1);
    assert_eq!(drops(), start);

    // Dropping the head frees the whole chain without a collection.
    drop(a);
    assert_eq!(ctx.len(), 0);
    assert_eq!(drops(), start + 2);
}

#[test]
fn acyclic_records_never_need_collect() {
    let ctx = Context::new();
    let start = drops();

    let mut head = ctx.make(Node {
        value: 0,
        next: Handle::null(),
    });
    for value in 1..50 {
        let next = ctx.make(Node {
            value,
            next: Handle::null(),
        });
        next.borrow_mut().next = head.clone();
        head = next;
    }
    assert_eq!(ctx.len(), 50);

    drop(head);
    assert_eq!(ctx.len(), 0);
    assert_eq!(drops(), start + 50);
}

#[test]
fn overwriting_a_slot_releases_the_old_edge() {
    let ctx = Context::new();
    let start = drops();

    let a = ctx.make(Node {
        value: 1,
        next: Handle::null(),
    });
    let b = ctx.make(Node {
        value: 2,
        next: Handle::null(),
    });
    a.borrow_mut().next = b.clone();
    drop(b);
    assert_eq!(drops(), start);

    // Replacing the edge drops the last reference to the old target.
    a.borrow_mut().next = Handle::null();
    assert_eq!(drops(), start + 1);
    assert_eq!(ctx.len(), 1);
}

#[test]
fn borrow_discipline() {
    let ctx = Context::new();
    let a = ctx.make(Plain { x: 1 });

    {
        let r1 = a.borrow();
        let r2 = a.borrow();
        assert_eq!(r1.x + r2.x, 2);
        assert!(a.try_borrow_mut().is_err());
    }
    {
        let mut w = a.borrow_mut();
        w.x = 5;
        assert!(a.try_borrow().is_err());
    }
    assert_eq!(a.borrow().x, 5);
}

#[test]
#[should_panic(expected = "null managed handle")]
fn borrowing_a_null_handle_panics() {
    let null = Handle::<Plain>::null();
    let _ = null.borrow();
}
