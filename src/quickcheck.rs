use crate::hash::key::KeyHasher;
use crate::{shared_ptr::SharedPointerKind, GenericHamt};
use ::quickcheck::{Arbitrary, Gen};
use std::convert::Infallible;

impl<K, V, S, P> Arbitrary for GenericHamt<K, V, S, P>
where
    K: Clone + Arbitrary + Sync,
    V: Clone + Arbitrary + Sync,
    S: KeyHasher<K, Error = Infallible> + Clone + Default + Send + Sync + 'static,
    P: SharedPointerKind + 'static,
{
    fn arbitrary(g: &mut Gen) -> Self {
        GenericHamt::from(Vec::<(K, V)>::arbitrary(g))
    }
}
