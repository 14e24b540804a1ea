#![no_main]

use std::collections::HashMap as NatMap;
use std::fmt::Debug;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use ctxvars::Hamt;

#[derive(Arbitrary, Debug)]
enum Action<K, V> {
    Assoc(K, V),
    Without(K),
    Snapshot,
}

fuzz_target!(|actions: Vec<Action<u16, u32>>| {
    let mut map: Hamt<u16, u32> = Hamt::new();
    let mut nat = NatMap::new();
    let mut snapshots = Vec::new();
    for action in actions {
        match action {
            Action::Assoc(key, value) => {
                let len = nat.len() + if nat.contains_key(&key) { 0 } else { 1 };
                nat.insert(key, value);
                map = map.update(key, value);
                assert_eq!(len, map.len());
                assert_eq!(Some(&value), map.get(&key));
            }
            Action::Without(key) => {
                let len = nat.len() - if nat.contains_key(&key) { 1 } else { 0 };
                nat.remove(&key);
                let next = map.without(&key).unwrap();
                if len == map.len() {
                    assert!(next.ptr_eq(&map));
                }
                map = next;
                assert_eq!(len, map.len());
                assert_eq!(None, map.get(&key));
            }
            Action::Snapshot => snapshots.push((map.clone(), nat.clone())),
        }
        map.assert_invariants();
    }
    assert_eq!(Hamt::from(nat.clone()), map);
    assert_eq!(map.iter().collect::<NatMap<_, _>>(), nat);
    assert_eq!(map.iter().count(), nat.len());
    for (map, nat) in snapshots {
        map.assert_invariants();
        assert_eq!(map.into_iter().collect::<NatMap<_, _>>(), nat);
    }
});
