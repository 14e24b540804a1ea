// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use arbitrary::{size_hint, Arbitrary, Result, Unstructured};
use std::convert::Infallible;

use crate::hash::key::KeyHasher;
use crate::{shared_ptr::SharedPointerKind, GenericHamt};

impl<'a, K, V, S, P> Arbitrary<'a> for GenericHamt<K, V, S, P>
where
    K: Arbitrary<'a> + Clone,
    V: Arbitrary<'a> + Clone,
    S: KeyHasher<K, Error = Infallible> + Clone + Default + 'static,
    P: SharedPointerKind + 'static,
{
    fn arbitrary(u: &mut Unstructured<'a>) -> Result<Self> {
        u.arbitrary_iter()?.collect()
    }

    fn arbitrary_take_rest(u: Unstructured<'a>) -> Result<Self> {
        u.arbitrary_take_rest_iter()?.collect()
    }

    fn size_hint(depth: usize) -> (usize, Option<usize>) {
        size_hint::recursion_guard(depth, |depth| {
            size_hint::and(<usize as Arbitrary>::size_hint(depth), (0, None))
        })
    }
}
