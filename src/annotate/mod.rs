pub mod asn;
pub mod hops;
pub mod process;
pub mod renamer;

pub use asn::{AsnAnnotator, Network};
pub use hops::HopProcessor;
pub use process::{AnnotationProcessor, AnnotationRow};
pub use renamer::DatatypeRenamer;

/// Rewrite an object name from one datatype to another. Both the
/// `<datatype>-` component of the file name and the `<datatype>/` path
/// segment are replaced, e.g.
///   ndt/annotation/2023/03/01/20230302T031500Z-annotation-mlab1-chs0t-ndt.tgz
/// becomes
///   ndt/annotation2/2023/03/01/20230302T031500Z-annotation2-mlab1-chs0t-ndt.tgz
///
/// Plain substring replacement is acceptable for the known naming scheme.
pub fn rewrite_datatype(object: &str, from: &str, to: &str) -> String {
    object
        .replace(&format!("{}-", from), &format!("{}-", to))
        .replace(&format!("{}/", from), &format!("{}/", to))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrite_replaces_both_forms() {
        let object = "ndt/annotation/2023/03/01/20230302T031500.576788Z-annotation-mlab1-chs0t-ndt.tgz";
        let out = rewrite_datatype(object, "annotation", "annotation2");
        assert_eq!(
            out,
            "ndt/annotation2/2023/03/01/20230302T031500.576788Z-annotation2-mlab1-chs0t-ndt.tgz"
        );
    }

    #[test]
    fn test_rewrite_leaves_other_segments_alone() {
        let object = "ndt/hopannotation1/2023/03/01/file-hopannotation1-x.tgz";
        let out = rewrite_datatype(object, "hopannotation1", "hopannotation2");
        assert_eq!(out, "ndt/hopannotation2/2023/03/01/file-hopannotation2-x.tgz");
        // A datatype that does not appear is a no-op.
        assert_eq!(rewrite_datatype(object, "annotation9", "x"), object);
    }
}
