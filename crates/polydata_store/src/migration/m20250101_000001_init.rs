use sea_orm_migration::prelude::*;

use crate::db::PolyTable;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(PolyTable::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PolyTable::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(PolyTable::Container).text().not_null())
                    .col(ColumnDef::new(PolyTable::Type).text().not_null())
                    .col(ColumnDef::new(PolyTable::LogicalId).text().not_null())
                    .col(ColumnDef::new(PolyTable::Data).text().not_null())
                    .col(
                        ColumnDef::new(PolyTable::UpdateDate)
                            .big_integer()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // Unique logical key; the atomic upsert conflicts on this index.
        manager
            .create_index(
                Index::create()
                    .name("idx_poly_logical_key")
                    .table(PolyTable::Table)
                    .col(PolyTable::Container)
                    .col(PolyTable::Type)
                    .col(PolyTable::LogicalId)
                    .unique()
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_poly_update_date")
                    .table(PolyTable::Table)
                    .col(PolyTable::UpdateDate)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(PolyTable::Table).to_owned())
            .await
    }
}
