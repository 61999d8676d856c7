use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240301_000001_create_locations_table::Migration),
            Box::new(m20240301_000002_create_product_variants_table::Migration),
            Box::new(m20240301_000003_create_location_inventory_table::Migration),
            Box::new(m20240301_000004_create_inventory_movements_table::Migration),
        ]
    }
}

mod m20240301_000001_create_locations_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000001_create_locations_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Locations::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Locations::Id)
                                .big_integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(Locations::Name).string().not_null())
                        .col(
                            ColumnDef::new(Locations::Code)
                                .string_len(64)
                                .not_null()
                                .unique_key(),
                        )
                        .col(
                            ColumnDef::new(Locations::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(Locations::IsDefault)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(Locations::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Locations::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Locations::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Locations {
        Table,
        Id,
        Name,
        Code,
        IsActive,
        IsDefault,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240301_000002_create_product_variants_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000002_create_product_variants_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(ProductVariants::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ProductVariants::Id)
                                .big_integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(ProductVariants::Sku)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(ProductVariants::Name).string().not_null())
                        .col(
                            ColumnDef::new(ProductVariants::TotalQuantity)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(ProductVariants::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ProductVariants::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(ProductVariants::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum ProductVariants {
        Table,
        Id,
        Sku,
        Name,
        TotalQuantity,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240301_000003_create_location_inventory_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000003_create_location_inventory_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(LocationInventory::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(LocationInventory::Id)
                                .big_integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(LocationInventory::LocationId)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(LocationInventory::VariantId)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(LocationInventory::Quantity)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(LocationInventory::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(LocationInventory::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            // The projection row is the per-pair serialization point; exactly one may exist.
            manager
                .create_index(
                    Index::create()
                        .name("ux_location_inventory_location_variant")
                        .table(LocationInventory::Table)
                        .col(LocationInventory::LocationId)
                        .col(LocationInventory::VariantId)
                        .unique()
                        .if_not_exists()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("ix_location_inventory_variant")
                        .table(LocationInventory::Table)
                        .col(LocationInventory::VariantId)
                        .if_not_exists()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(LocationInventory::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum LocationInventory {
        Table,
        Id,
        LocationId,
        VariantId,
        Quantity,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240301_000004_create_inventory_movements_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000004_create_inventory_movements_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(InventoryMovements::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(InventoryMovements::Id)
                                .big_integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(InventoryMovements::VariantId)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryMovements::LocationId)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryMovements::MovementType)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryMovements::Quantity)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryMovements::QuantityBefore)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryMovements::QuantityAfter)
                                .big_integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(InventoryMovements::OrderId).big_integer().null())
                        .col(
                            ColumnDef::new(InventoryMovements::OrderItemId)
                                .big_integer()
                                .null(),
                        )
                        .col(ColumnDef::new(InventoryMovements::ReturnId).big_integer().null())
                        .col(
                            ColumnDef::new(InventoryMovements::PurchaseOrderItemId)
                                .big_integer()
                                .null(),
                        )
                        .col(ColumnDef::new(InventoryMovements::Reference).string().null())
                        .col(ColumnDef::new(InventoryMovements::Notes).text().null())
                        .col(
                            ColumnDef::new(InventoryMovements::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            let indexes = [
                (
                    "ix_inventory_movements_variant_location_created",
                    vec![
                        InventoryMovements::VariantId,
                        InventoryMovements::LocationId,
                        InventoryMovements::CreatedAt,
                    ],
                ),
                (
                    "ix_inventory_movements_order_type",
                    vec![InventoryMovements::OrderId, InventoryMovements::MovementType],
                ),
                (
                    "ix_inventory_movements_order_item_type",
                    vec![
                        InventoryMovements::OrderItemId,
                        InventoryMovements::MovementType,
                    ],
                ),
                (
                    "ix_inventory_movements_return_type",
                    vec![InventoryMovements::ReturnId, InventoryMovements::MovementType],
                ),
                (
                    "ix_inventory_movements_po_item_type",
                    vec![
                        InventoryMovements::PurchaseOrderItemId,
                        InventoryMovements::MovementType,
                    ],
                ),
            ];

            for (name, columns) in indexes {
                let mut index = Index::create();
                index
                    .name(name)
                    .table(InventoryMovements::Table)
                    .if_not_exists();
                for column in columns {
                    index.col(column);
                }
                manager.create_index(index.to_owned()).await?;
            }

            Ok(())
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(InventoryMovements::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden, Clone, Copy)]
    enum InventoryMovements {
        Table,
        Id,
        VariantId,
        LocationId,
        MovementType,
        Quantity,
        QuantityBefore,
        QuantityAfter,
        OrderId,
        OrderItemId,
        ReturnId,
        PurchaseOrderItemId,
        Reference,
        Notes,
        CreatedAt,
    }
}
