pub mod api_invariants;
pub mod common;
pub mod gradcheck;
pub mod recording_backend;
pub mod running_stats;
pub mod smoke;

#[macro_export]
macro_rules! define_backend_tests {
    ($module:ident, $backend_ctor:expr) => {
        #[cfg(test)]
        mod $module {
            macro_rules! backend_test {
                ($name:ident, $func:path) => {
                    #[test]
                    fn $name() {
                        let backend = ($backend_ctor)();
                        $func(&backend);
                    }
                };
            }

            use $crate::{api_invariants, gradcheck, running_stats, smoke};

            backend_test!(smoke_spatial_forward_normalizes_channels, smoke::spatial_forward_normalizes_channels);
            backend_test!(smoke_per_activation_forward_matches_reference, smoke::per_activation_forward_matches_reference);
            backend_test!(smoke_volumetric_forward_uses_spatial_statistics, smoke::volumetric_forward_uses_spatial_statistics);
            backend_test!(smoke_inference_uses_fixed_statistics, smoke::inference_uses_fixed_statistics);
            backend_test!(smoke_half_precision_running_stats_are_written_back, smoke::half_precision_running_stats_are_written_back);
            backend_test!(smoke_layer_trains_then_infers, smoke::layer_trains_then_infers);

            backend_test!(gradcheck_per_activation, gradcheck::per_activation_gradients_match_finite_differences);
            backend_test!(gradcheck_spatial, gradcheck::spatial_gradients_match_finite_differences);
            backend_test!(gradcheck_single_tracks_double, gradcheck::single_precision_gradients_track_double_precision);
            backend_test!(gradcheck_half_tracks_double, gradcheck::half_precision_gradients_track_double_precision);

            backend_test!(running_decay_recurrence_holds_for_known_batch, running_stats::decay_recurrence_holds_for_known_batch);
            backend_test!(running_statistics_converge_to_population, running_stats::running_statistics_converge_to_population);
            backend_test!(running_decay_one_keeps_running_statistics, running_stats::decay_one_keeps_running_statistics);

            backend_test!(api_backward_before_forward_is_rejected, api_invariants::backward_before_forward_is_rejected);
            backend_test!(api_backward_is_repeatable, api_invariants::backward_is_repeatable);
            backend_test!(api_repeated_forward_replaces_saved_state, api_invariants::repeated_forward_replaces_saved_state);
            backend_test!(api_epsilon_below_minimum_is_rejected, api_invariants::epsilon_below_minimum_is_rejected);
            backend_test!(api_strided_running_statistics_are_rejected, api_invariants::strided_running_statistics_are_rejected);
            backend_test!(api_decay_outside_unit_interval_is_rejected, api_invariants::decay_outside_unit_interval_is_rejected);
            backend_test!(api_malformed_forward_inputs_leave_state_untouched, api_invariants::malformed_forward_inputs_leave_state_untouched);
            backend_test!(api_running_statistics_match_by_element_count, api_invariants::running_statistics_match_by_element_count);
            backend_test!(api_strided_inputs_match_contiguous_inputs, api_invariants::strided_inputs_match_contiguous_inputs);
            backend_test!(api_backend_failures_leave_running_statistics_untouched, api_invariants::backend_failures_leave_running_statistics_untouched);
            backend_test!(api_rejected_inference_never_reaches_backend, api_invariants::rejected_inference_never_reaches_backend);
        }
    };
}
