use bn_rs::backend::shape_helpers::{
    checked_element_count_or_error, reduced_count, statistic_index_map,
};

#[test]
fn reduced_count_multiplies_reduced_dims() {
    assert_eq!(reduced_count(&[2, 3, 4, 5], &[0, 2, 3]), Some(40));
    assert_eq!(reduced_count(&[8, 5], &[0]), Some(8));
}

#[test]
fn reduced_count_reports_overflow() {
    assert_eq!(reduced_count(&[usize::MAX, 3, 2], &[0, 2]), None);
    // Only reduced axes count towards the total.
    assert_eq!(reduced_count(&[2, usize::MAX], &[0]), Some(2));
}

#[test]
fn checked_element_count_or_error_reports_overflow() {
    let err = checked_element_count_or_error(&[usize::MAX, 2], || "overflow".to_string())
        .expect_err("overflow should be reported");
    assert_eq!(err, "overflow");
    assert_eq!(
        checked_element_count_or_error::<String, _>(&[2, 3, 4], || "overflow".to_string()),
        Ok(24)
    );
}

#[test]
fn statistic_index_map_per_activation_cycles_features() {
    let map = statistic_index_map(&[2, 3], &[0]);
    assert_eq!(map, vec![0, 1, 2, 0, 1, 2]);
}

#[test]
fn statistic_index_map_spatial_follows_channel() {
    let map = statistic_index_map(&[2, 2, 1, 2], &[0, 2, 3]);
    assert_eq!(map, vec![0, 0, 1, 1, 0, 0, 1, 1]);
}

#[test]
fn statistic_index_map_handles_empty_shapes() {
    assert!(statistic_index_map(&[0, 3], &[0]).is_empty());
}
