//! Pairwise transformation of concurrent operations.
//!
//! Given operations `a` and `b` created against the same document state,
//! [`transform`] produces `(a', b')` such that applying `a` then `b'` reaches
//! the same content as applying `b` then `a'`. The function is pure and
//! total: it never fails and never consults document state.

use super::operation::{Operation, NOOP_POSITION};

/// Transform two concurrent operations so they commute.
///
/// Returns `(a', b')`: `a` rewritten to apply after `b`, and `b` rewritten to
/// apply after `a`. Swapping the arguments swaps the outputs.
pub fn transform(a: &Operation, b: &Operation) -> (Operation, Operation) {
    // A no-op has nothing to commute with; shifting against its sentinel
    // position would displace the other operation.
    if a.is_noop() || b.is_noop() {
        return (a.clone(), b.clone());
    }

    match (a.is_insert(), b.is_insert()) {
        (true, true) => transform_insert_insert(a, b),
        (false, false) => transform_delete_delete(a, b),
        (true, false) => transform_insert_delete(a, b),
        (false, true) => {
            let (b_prime, a_prime) = transform_insert_delete(b, a);
            (a_prime, b_prime)
        }
    }
}

/// Two concurrent inserts. Equal positions tie-break on user id: the lower
/// id keeps its position, the higher shifts right.
fn transform_insert_insert(a: &Operation, b: &Operation) -> (Operation, Operation) {
    let mut a_prime = a.clone();
    let mut b_prime = b.clone();

    match a.position.cmp(&b.position) {
        std::cmp::Ordering::Less => b_prime.position += 1,
        std::cmp::Ordering::Greater => a_prime.position += 1,
        std::cmp::Ordering::Equal => {
            if a.user_id < b.user_id {
                b_prime.position += 1;
            } else {
                a_prime.position += 1;
            }
        }
    }

    (a_prime, b_prime)
}

/// Two concurrent deletes. Deleting the same character collapses both sides
/// to no-ops: the character is already gone once either applies.
fn transform_delete_delete(a: &Operation, b: &Operation) -> (Operation, Operation) {
    let mut a_prime = a.clone();
    let mut b_prime = b.clone();

    match a.position.cmp(&b.position) {
        std::cmp::Ordering::Less => b_prime.position -= 1,
        std::cmp::Ordering::Greater => a_prime.position -= 1,
        std::cmp::Ordering::Equal => {
            a_prime.position = NOOP_POSITION;
            b_prime.position = NOOP_POSITION;
        }
    }

    (a_prime, b_prime)
}

/// Insert vs delete. Inserting at or before the delete's position pushes the
/// deleted character one to the right; inserting after it shifts the insert
/// left by the removed character.
fn transform_insert_delete(ins: &Operation, del: &Operation) -> (Operation, Operation) {
    let mut ins_prime = ins.clone();
    let mut del_prime = del.clone();

    if ins.position <= del.position {
        del_prime.position += 1;
    } else {
        ins_prime.position -= 1;
    }

    (ins_prime, del_prime)
}
