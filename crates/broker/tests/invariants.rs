// SPDX-License-Identifier: BUSL-1.1

//! Property tests for the quantified invariants in the stream-lifecycle
//! manager: missed-ACK threshold, per-stream output cap, and
//! single-direct-stream-at-a-time.

use proptest::prelude::*;

use glasses_broker::collaborators::InMemoryMediaBackend;
use glasses_broker::managers::stream_supervisor::StreamSupervisor;
use glasses_broker::messages::StreamStatus;

proptest! {
    /// However many ACKs are missed in a row, the stream is marked
    /// `Timeout` as soon as (and never before) the third consecutive miss.
    #[test]
    fn missed_acks_never_exceed_threshold_before_timeout(misses in 0usize..8) {
        let mut sup = StreamSupervisor::new(10, 10, 3);
        sup.request_direct("app.a", "rtmp://x/k".into(), "s1".into(), (None, None, None));

        for i in 0..misses {
            sup.keep_alive_tick("s1", format!("k{i}"), 0);
            sup.on_ack_timeout("s1", &format!("k{i}"));

            let entity = sup.get("s1");
            if i + 1 >= 3 {
                prop_assert!(entity.is_none() || entity.unwrap().status == StreamStatus::Timeout);
                break;
            }
            let entity = entity.unwrap();
            prop_assert_eq!(entity.missed_acks, (i + 1) as u32);
            prop_assert_ne!(entity.status, StreamStatus::Timeout);
        }
    }

    /// A missed ACK followed by a received ACK before the next miss always
    /// resets the counter to zero, regardless of how many times it repeats.
    #[test]
    fn ack_after_miss_always_resets_counter(rounds in 1usize..6) {
        let mut sup = StreamSupervisor::new(10, 10, 3);
        sup.request_direct("app.a", "rtmp://x/k".into(), "s1".into(), (None, None, None));

        for i in 0..rounds {
            let missed_id = format!("missed{i}");
            sup.keep_alive_tick("s1", missed_id.clone(), 0);
            sup.on_ack_timeout("s1", &missed_id);

            let acked_id = format!("acked{i}");
            sup.keep_alive_tick("s1", acked_id.clone(), 0);
            sup.on_keep_alive_ack("s1", &acked_id);

            prop_assert_eq!(sup.get("s1").unwrap().missed_acks, 0);
        }
    }

    /// A second direct-stream request is always rejected while the first is
    /// still active, no matter which app ids or stream ids are used.
    #[test]
    fn second_direct_request_is_always_rejected_while_first_active(
        first_app in "[a-z]{1,8}",
        second_app in "[a-z]{1,8}",
        first_stream in "[a-z0-9]{1,8}",
        second_stream in "[a-z0-9]{1,8}",
    ) {
        prop_assume!(first_stream != second_stream);
        let mut sup = StreamSupervisor::new(10, 10, 3);
        sup.request_direct(&first_app, "rtmp://x/k".into(), first_stream.clone(), (None, None, None));
        let effects = sup.request_direct(&second_app, "rtmp://y/k".into(), second_stream.clone(), (None, None, None));

        prop_assert!(!effects.is_empty());
        prop_assert!(sup.get(&second_stream).is_none());
        prop_assert!(sup.get(&first_stream).is_some());
        prop_assert_eq!(sup.direct_stream_id(), Some(first_stream.as_str()));
    }

    /// However many outputs are attempted, the surviving count on a managed
    /// stream never exceeds the configured per-stream cap.
    #[test]
    fn output_count_never_exceeds_per_stream_cap(cap in 1usize..5, attempts in 0usize..10) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let mut sup = StreamSupervisor::new(cap, 100, 3);
            let media = InMemoryMediaBackend::new();
            sup.subscribe_cloud_rtmp("app.a", || "s1".into(), &media).await.unwrap();

            for i in 0..attempts {
                let _ = sup.add_output("s1", "app.a", format!("rtmp://out/{i}"), format!("out{i}"), &media).await;
            }

            prop_assert!(sup.get("s1").unwrap().outputs.len() <= cap);
            Ok(())
        })?;
    }
}
