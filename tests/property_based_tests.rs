mod common;

use common::strategies::*;
use common::at;
use game_state_cache::keys::DomainKind;
use game_state_cache::store::StoreClient;
use game_state_cache::{CacheManager, TaskManager, TaskSettings, TtlPolicy};
use proptest::prelude::*;
use std::collections::HashSet;

fn cache(store: &StoreClient) -> CacheManager {
    CacheManager::new(store.clone(), DomainKind::Unit.namespace(), TtlPolicy::Persistent)
}

fn tasks(store: &StoreClient, settings: TaskSettings) -> TaskManager {
    TaskManager::new(store.clone(), DomainKind::Unit.namespace(), settings)
}

proptest! {
    /// Property: writing one field never changes any other field of the record
    #[test]
    fn field_writes_are_independent(
        scope in scope_strategy(),
        fields in field_values_strategy(),
        target in any::<prop::sample::Index>(),
        replacement in any::<i64>(),
    ) {
        tokio_test::block_on(async {
            let store = StoreClient::in_memory();
            let cache = cache(&store);
            for (field, value) in &fields {
                cache.set_field(&scope, field, value).await.unwrap();
            }

            let (target_field, _) = &fields[target.index(fields.len())];
            cache.set_field(&scope, target_field, &replacement).await.unwrap();

            for (field, value) in &fields {
                let expected = if field == target_field { replacement } else { *value };
                prop_assert_eq!(cache.get_field::<i64>(&scope, field).await.unwrap(), Some(expected));
            }
            Ok(())
        })?;
    }

    /// Property: a pull returns exactly the due entries, ascending by due time
    #[test]
    fn pull_due_returns_due_entries_in_order(
        entries in scheduled_tasks_strategy(),
        cutoff in 0i64..3_600,
    ) {
        tokio_test::block_on(async {
            let store = StoreClient::in_memory();
            let tasks = tasks(&store, TaskSettings::default());
            for (member, offset) in &entries {
                tasks.schedule("42", member, at(*offset)).await.unwrap();
            }

            let pulled = tasks.pull_due("42", at(cutoff)).await.unwrap();
            let expected: HashSet<&str> = entries
                .iter()
                .filter(|(_, offset)| *offset <= cutoff)
                .map(|(member, _)| member.as_str())
                .collect();

            prop_assert_eq!(pulled.len(), expected.len());
            for entry in &pulled {
                prop_assert!(expected.contains(entry.member.as_str()));
                prop_assert!(entry.due_at <= at(cutoff));
            }
            for pair in pulled.windows(2) {
                prop_assert!(
                    (pair[0].due_at, &pair[0].member) < (pair[1].due_at, &pair[1].member)
                );
            }

            let status = tasks.queue_status("42", at(cutoff)).await.unwrap();
            prop_assert_eq!(status.due, 0);
            prop_assert_eq!(status.total as usize, entries.len() - expected.len());
            Ok(())
        })?;
    }

    /// Property: rescheduling keeps one entry per member at the latest due time
    #[test]
    fn reschedule_keeps_single_entry(
        member in "[a-z]{1,8}",
        offsets in prop::collection::vec(1i64..3_600, 1..10),
    ) {
        tokio_test::block_on(async {
            let store = StoreClient::in_memory();
            let tasks = tasks(&store, TaskSettings::default());
            for offset in &offsets {
                tasks.schedule("42", &member, at(*offset)).await.unwrap();
            }

            let last = *offsets.last().unwrap();
            prop_assert_eq!(tasks.due_at("42", &member).await.unwrap(), Some(at(last)));
            let pulled = tasks.pull_due("42", at(3_600)).await.unwrap();
            prop_assert_eq!(pulled.len(), 1);
            Ok(())
        })?;
    }

    /// Property: increments compose like integer addition
    #[test]
    fn increments_accumulate(
        deltas in prop::collection::vec(-1_000i64..1_000, 1..30),
    ) {
        tokio_test::block_on(async {
            let store = StoreClient::in_memory();
            let cache = cache(&store);
            let mut last = 0;
            for delta in &deltas {
                last = cache.increment_field("42", "gold", *delta).await.unwrap();
            }
            prop_assert_eq!(last, deltas.iter().sum::<i64>());
            prop_assert_eq!(cache.get_field::<i64>("42", "gold").await.unwrap(), Some(last));
            Ok(())
        })?;
    }
}
