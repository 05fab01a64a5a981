use crate::util::constants::{BYTES_IN_MBYTE, MAX_AGE};
use std::default::Default;
use strum_macros::EnumString;

/// Which collector drives the heap.
#[derive(Copy, Clone, EnumString, Debug, PartialEq, Eq)]
pub enum CollectorMode {
    /// Stop-the-world young collections with a card-table remembered set. Concurrent cycles
    /// are still available and keep the remembered set intact.
    Generational,
    /// Concurrent mark, evacuate and update-refs cycles over the whole heap. No card marking.
    Concurrent,
}

/// The default heap size.
pub const DEFAULT_HEAP_SIZE: usize = 64 * BYTES_IN_MBYTE;

fn always_valid<T>(_: &T) -> bool {
    true
}

fn is_percentage(v: &usize) -> bool {
    *v <= 100
}

macro_rules! options {
    ($($(#[$outer:meta])* $name:ident: $type:ty[$validator:expr] = $default:expr),*,) => [
        options!($($(#[$outer])* $name: $type[$validator] = $default),*);
    ];
    ($($(#[$outer:meta])* $name:ident: $type:ty[$validator:expr] = $default:expr),*) => [
        /// Runtime options. Every option can be set through an `RGC_<NAME>` environment variable
        /// or through [`crate::RGCBuilder::set_option`].
        #[derive(Clone, Debug)]
        pub struct Options {
            $($(#[$outer])* pub $name: $type),*
        }
        impl Options {
            /// Set an option from its name and a string value. Returns false (and leaves the
            /// option unchanged) if the name is unknown, the value cannot be parsed, or the
            /// value is rejected by the option's validator.
            pub fn set_from_str(&mut self, s: &str, val: &str) -> bool {
                match s {
                    // Parse the given value from str (by env vars or by calling set_option()) to the right type
                    $(stringify!($name) => if let Ok(ref val) = val.parse::<$type>() {
                        // Validate
                        let validate_fn = $validator;
                        let is_valid = validate_fn(val);
                        if is_valid {
                            // Only set value if valid.
                            self.$name = val.clone();
                        } else {
                            warn!("Unable to set {}={:?}. Invalid value. Default value will be used.", s, val);
                        }
                        is_valid
                    } else {
                        warn!("Unable to set {}={:?}. Cant parse value. Default value will be used.", s, val);
                        false
                    })*
                    _ => {
                        warn!("Unknown option {}", s);
                        false
                    }
                }
            }

            /// Options with their default values, ignoring the environment.
            pub fn new() -> Self {
                Options {
                    $($name: $default),*
                }
            }

            /// Read options from environment variables that start with `RGC_`.
            pub fn read_env_var_settings(&mut self) {
                // If we have env vars that start with RGC_ and match any option (such as RGC_THREADS),
                // we set the option to its value (if it is a valid value). Otherwise, use the default value.
                const PREFIX: &str = "RGC_";
                for (key, val) in std::env::vars() {
                    // strip the prefix, and get the lower case string
                    if let Some(rest_of_key) = key.strip_prefix(PREFIX) {
                        let lowercase: &str = &rest_of_key.to_lowercase();
                        match lowercase {
                            $(stringify!($name) => { self.set_from_str(lowercase, &val); },)*
                            _ => {}
                        }
                    }
                }
            }
        }
        impl Default for Options {
            fn default() -> Self {
                let mut options = Options::new();
                options.read_env_var_settings();
                options
            }
        }
    ]
}

options! {
    /// Number of GC worker threads.
    threads:                               usize         [|v: &usize| *v > 0] = num_cpus::get(),
    /// Heap size in bytes. Rounded down to a multiple of the region size.
    heap_size:                             usize         [|v: &usize| *v > 0] = DEFAULT_HEAP_SIZE,
    /// log2 of the region size in bytes.
    log_region_size:                       usize         [|v: &usize| (12..=26).contains(v)] = 18,
    /// log2 of the card size in bytes.
    log_card_size:                         usize         [|v: &usize| (7..=12).contains(v)] = 9,
    /// log2 of the task queue capacity. Informational: queue capacity is fixed at compile time.
    log_taskqueue_size:                    usize         [always_valid] = crate::util::constants::LOG_TASKQUEUE_SIZE,
    /// Number of entries in a SATB buffer.
    satb_buffer_size:                      usize         [|v: &usize| *v > 0] = 1024,
    /// A thread's SATB buffer is published once filtering leaves it this full (percent).
    satb_buffer_enqueue_threshold_percent: usize         [is_percentage] = 60,
    /// Number of completed SATB buffers that wakes up a waiting GC thread.
    satb_process_completed_threshold:      usize         [always_valid] = 20,
    /// Number of entries in a dirty card buffer.
    dirty_card_buffer_size:                usize         [|v: &usize| *v > 0] = 256,
    /// The maximum value for the tenuring threshold.
    max_tenuring_threshold:                usize         [|v: &usize| *v <= MAX_AGE] = MAX_AGE,
    /// The tenuring threshold before any survivor statistics are available.
    initial_tenuring_threshold:            usize         [|v: &usize| *v <= MAX_AGE] = 7,
    /// Desired percentage of survivor space used after a young collection.
    target_survivor_ratio:                 usize         [is_percentage] = 50,
    /// Size of a GC thread's local allocation buffer in bytes.
    gclab_size:                            usize         [|v: &usize| *v > 0] = 32 << 10,
    /// Size of a mutator's local allocation buffer in bytes.
    tlab_size:                             usize         [|v: &usize| *v > 0] = 32 << 10,
    /// A region with more garbage than this (percent of its used bytes) joins the collection set.
    garbage_threshold_percent:             usize         [is_percentage] = 25,
    /// An aged young region is promoted in place if its live data is at least this percent of its used bytes.
    promote_in_place_live_percent:         usize         [is_percentage] = 85,
    /// Number of spin iterations before a thread in the terminator yields.
    work_stealing_hard_spins:              usize         [always_valid] = 4096,
    /// Ratio of spins to yields while offering termination.
    work_stealing_spin_to_yield_ratio:     usize         [|v: &usize| *v > 0] = 10,
    /// Number of yields before a thread in the terminator sleeps.
    work_stealing_yields_before_sleep:     usize         [always_valid] = 1000,
    /// Sleep time in milliseconds for a thread in the terminator.
    work_stealing_sleep_millis:            u64           [always_valid] = 1,
    /// Number of young regions that triggers a young collection.
    young_regions:                         usize         [|v: &usize| *v > 0] = 16,
    /// The collector to use.
    collector_mode:                        CollectorMode [always_valid] = CollectorMode::Generational,
    /// Number of reference slots scanned per task when a large object is scanned in chunks.
    array_chunk_size:                      usize         [|v: &usize| *v > 0] = 512,
}
