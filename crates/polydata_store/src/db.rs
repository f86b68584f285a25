use sea_orm::sea_query;
use sea_orm_migration::prelude::Iden;

/// The single physical table multiplexing every logical entity. Rows are
/// partitioned by `(container, _type, _id)`, which is the logical primary
/// key; the surrogate `id` only exists to tie-break equal update stamps.
#[derive(Iden, Clone, Copy)]
pub enum PolyTable {
    #[iden = "poly"]
    Table,
    Id,
    Container,
    #[iden = "_type"]
    Type,
    #[iden = "_id"]
    LogicalId,
    Data,
    UpdateDate,
}

/// Application-level discriminator for the `_type` column. Each kind
/// partitions the table into an independent entity space; a `data` row and a
/// `poly_index` row never cross-match for the same container/id.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RowKind {
    Data,
    Metadata,
    Polymap,
    PolyIndex,
}

impl RowKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RowKind::Data => "data",
            RowKind::Metadata => "metadata",
            RowKind::Polymap => "polymap",
            RowKind::PolyIndex => "poly_index",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::RowKind;

    #[test]
    fn discriminators_match_the_disk_contract() {
        assert_eq!(RowKind::Data.as_str(), "data");
        assert_eq!(RowKind::Metadata.as_str(), "metadata");
        assert_eq!(RowKind::Polymap.as_str(), "polymap");
        assert_eq!(RowKind::PolyIndex.as_str(), "poly_index");
    }
}
