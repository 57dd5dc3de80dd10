//! Philadelphia ZIP5 codes, including PO-box and unique codes.

/// Every ZIP5 assigned to Philadelphia County.
pub const PHILLY_ZIPS: &[&str] = &[
    "19019", "19092", "19093", "19099", "19101", "19102", "19103", "19104", "19105", "19106",
    "19107", "19108", "19109", "19110", "19111", "19112", "19113", "19114", "19115", "19116",
    "19118", "19119", "19120", "19121", "19122", "19123", "19124", "19125", "19126", "19127",
    "19128", "19129", "19130", "19131", "19132", "19133", "19134", "19135", "19136", "19137",
    "19138", "19139", "19140", "19141", "19142", "19143", "19144", "19145", "19146", "19147",
    "19148", "19149", "19150", "19151", "19152", "19153", "19154", "19155", "19160", "19161",
    "19162", "19170", "19171", "19172", "19173", "19175", "19176", "19177", "19178", "19179",
    "19181", "19182", "19183", "19184", "19185", "19187", "19188", "19190", "19191", "19192",
    "19193", "19194", "19195", "19196", "19197", "19244", "19255",
];

/// Membership test against [`PHILLY_ZIPS`], using only the first five
/// characters so that ZIP+4 values match.
#[must_use]
pub fn is_philly_zip(zip: &str) -> bool {
    let zip5 = zip.trim();
    let zip5 = zip5.get(..5).unwrap_or(zip5);
    PHILLY_ZIPS.contains(&zip5)
}
