use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

fn big_pk<T: IntoIden>(name: T) -> ColumnDef {
    ColumnDef::new(name)
        .big_integer()
        .not_null()
        .auto_increment()
        .primary_key()
        .to_owned()
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Topics::Table)
                    .if_not_exists()
                    .col(big_pk(Topics::Id))
                    .col(ColumnDef::new(Topics::Name).string_len(255).not_null().unique_key())
                    .col(
                        timestamp_with_time_zone(Topics::CreatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Subscribers::Table)
                    .if_not_exists()
                    .col(big_pk(Subscribers::Id))
                    .col(string(Subscribers::Name).default(""))
                    .col(
                        ColumnDef::new(Subscribers::Email)
                            .string_len(255)
                            .not_null()
                            .unique_key(),
                    )
                    .col(boolean(Subscribers::IsActive).default(true))
                    .col(
                        timestamp_with_time_zone(Subscribers::CreatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        timestamp_with_time_zone(Subscribers::UpdatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Subscriptions::Table)
                    .if_not_exists()
                    .col(big_pk(Subscriptions::Id))
                    .col(big_integer(Subscriptions::SubscriberId))
                    .col(big_integer(Subscriptions::TopicId))
                    .col(
                        timestamp_with_time_zone(Subscriptions::CreatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_subscriptions_subscriber")
                            .from(Subscriptions::Table, Subscriptions::SubscriberId)
                            .to(Subscribers::Table, Subscribers::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_subscriptions_topic")
                            .from(Subscriptions::Table, Subscriptions::TopicId)
                            .to(Topics::Table, Topics::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Contents::Table)
                    .if_not_exists()
                    .col(big_pk(Contents::Id))
                    .col(big_integer(Contents::TopicId))
                    .col(ColumnDef::new(Contents::Title).string_len(255).not_null())
                    .col(text(Contents::Body))
                    .col(boolean(Contents::IsPublished).default(false))
                    .col(timestamp_with_time_zone_null(Contents::PublishedAt))
                    .col(boolean(Contents::NotificationsSent).default(false))
                    .col(timestamp_with_time_zone_null(Contents::NotificationsSentAt))
                    .col(
                        timestamp_with_time_zone(Contents::CreatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        timestamp_with_time_zone(Contents::UpdatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_contents_topic")
                            .from(Contents::Table, Contents::TopicId)
                            .to(Topics::Table, Topics::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(EmailLogs::Table)
                    .if_not_exists()
                    .col(big_pk(EmailLogs::Id))
                    .col(big_integer(EmailLogs::SubscriberId))
                    .col(big_integer(EmailLogs::ContentId))
                    .col(
                        ColumnDef::new(EmailLogs::EmailAddress)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(ColumnDef::new(EmailLogs::Subject).string_len(255).not_null())
                    .col(text(EmailLogs::Body))
                    .col(
                        ColumnDef::new(EmailLogs::Status)
                            .string_len(32)
                            .not_null()
                            .default("pending"),
                    )
                    .col(timestamp_with_time_zone_null(EmailLogs::SentAt))
                    .col(text_null(EmailLogs::ErrorMessage))
                    .col(
                        ColumnDef::new(EmailLogs::RetryCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        timestamp_with_time_zone(EmailLogs::CreatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        timestamp_with_time_zone(EmailLogs::UpdatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_email_logs_subscriber")
                            .from(EmailLogs::Table, EmailLogs::SubscriberId)
                            .to(Subscribers::Table, Subscribers::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_email_logs_content")
                            .from(EmailLogs::Table, EmailLogs::ContentId)
                            .to(Contents::Table, Contents::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Indexes backing the pending-content scan and the retry sweep
        manager
            .create_index(
                Index::create()
                    .name("idx_subscriptions_topic_id")
                    .table(Subscriptions::Table)
                    .col(Subscriptions::TopicId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_subscriptions_subscriber_topic")
                    .table(Subscriptions::Table)
                    .col(Subscriptions::SubscriberId)
                    .col(Subscriptions::TopicId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_contents_pending")
                    .table(Contents::Table)
                    .col(Contents::IsPublished)
                    .col(Contents::NotificationsSent)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_email_logs_status_retry")
                    .table(EmailLogs::Table)
                    .col(EmailLogs::Status)
                    .col(EmailLogs::RetryCount)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_email_logs_content_id")
                    .table(EmailLogs::Table)
                    .col(EmailLogs::ContentId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(EmailLogs::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Contents::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Subscriptions::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Subscribers::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Topics::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum Topics {
    Table,
    Id,
    Name,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Subscribers {
    Table,
    Id,
    Name,
    Email,
    IsActive,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Subscriptions {
    Table,
    Id,
    SubscriberId,
    TopicId,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Contents {
    Table,
    Id,
    TopicId,
    Title,
    Body,
    IsPublished,
    PublishedAt,
    NotificationsSent,
    NotificationsSentAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum EmailLogs {
    Table,
    Id,
    SubscriberId,
    ContentId,
    EmailAddress,
    Subject,
    Body,
    Status,
    SentAt,
    ErrorMessage,
    RetryCount,
    CreatedAt,
    UpdatedAt,
}
